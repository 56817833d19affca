use async_trait::async_trait;
use kg_rag::cache::{NodeContextCache, NodeContextSnapshot};
use kg_rag::graph::{GraphNode, GraphSchema, GraphStore, InMemoryGraphStore, TabularResult};
use kg_rag::llm::ScriptedModel;
use kg_rag::retrieval::{FallbackRetriever, RetrievalSource, Retriever, StructuredRetriever};
use kg_rag::synth::{AnswerSynthesizer, NO_ANSWER};
use kg_rag::{EntityResolver, GraphRagPipeline, RagResult, ResolvedQuery, RetrievalResult};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const OWNER_QUERY: &str = "MATCH (c:Company {name: 'Acme'})-[r:OWNED_BY]->(o) RETURN c.name, type(r), o.name";

fn acme_store() -> InMemoryGraphStore {
    InMemoryGraphStore::new()
        .with_node(GraphNode::new("n1", &["Company"], Some("Acme")))
        .with_query_result(
            OWNER_QUERY,
            TabularResult {
                columns: vec!["c.name".into(), "type(r)".into(), "o.name".into()],
                records: vec![vec![json!("Acme"), json!("OWNED_BY"), json!("Wile E. Holdings")]],
            },
        )
}

fn pipeline(
    model: Arc<ScriptedModel>,
    store: Arc<InMemoryGraphStore>,
    snapshot: NodeContextSnapshot,
    schema: GraphSchema,
) -> GraphRagPipeline {
    let snapshot = Arc::new(snapshot);
    GraphRagPipeline::new(
        snapshot.clone(),
        EntityResolver::new(model.clone()),
        Arc::new(StructuredRetriever::new(model.clone(), store.clone(), schema)),
        Arc::new(FallbackRetriever::new(store, snapshot)),
        AnswerSynthesizer::new(model),
    )
}

/// Counts how often the wrapped retriever runs
struct Counting {
    inner: FallbackRetriever,
    calls: AtomicUsize,
}

#[async_trait]
impl Retriever for Counting {
    fn source(&self) -> RetrievalSource {
        self.inner.source()
    }

    async fn retrieve(&self, query: &ResolvedQuery) -> RagResult<RetrievalResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(query).await
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

#[tokio::test]
async fn test_acme_end_to_end_without_fallback() {
    let store = Arc::new(acme_store());
    let snapshot = NodeContextSnapshot::from_nodes(&store.query_nodes().await.unwrap());
    let schema = store.schema().await.unwrap();
    let model = Arc::new(
        ScriptedModel::new()
            .on("Graph Node Information", "Who owns Acme?\nRelevant Node IDs: [n1]")
            .on("Generate a Cypher statement", format!("```cypher\n{}\n```", OWNER_QUERY))
            .on("Wile E. Holdings", "Acme is owned by Wile E. Holdings."),
    );
    let pipeline = pipeline(model.clone(), store.clone(), snapshot, schema);

    let outcome = pipeline.answer("Who owns Acme?").await.unwrap();

    assert!(outcome.resolved.question.contains("Acme"));
    assert_eq!(outcome.resolved.node_ids, vec!["n1"]);
    assert!(!outcome.fallback_used());
    assert_eq!(outcome.result().source, RetrievalSource::Structured);
    assert_eq!(outcome.result().fragments()[0].query, OWNER_QUERY);
    assert!(outcome.answer.contains("Wile E. Holdings"));

    assert_eq!(store.structured_query_count(), 1);
    assert_eq!(store.traversal_count(), 0);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn test_empty_structured_result_invokes_fallback_once() {
    let store = Arc::new(
        InMemoryGraphStore::new()
            .with_node(GraphNode::new("n1", &["Company"], Some("Acme")))
            .with_node(GraphNode::new("n2", &["Executive"], Some("Jane Doe")))
            .with_edge("n1", "MANAGED_BY", "n2")
            .with_query_result("MATCH (c:Company)-[:OWNED_BY]->(o) RETURN o", TabularResult::default()),
    );
    let snapshot = Arc::new(NodeContextSnapshot::from_nodes(&store.query_nodes().await.unwrap()));
    let model = Arc::new(
        ScriptedModel::new()
            .on("Graph Node Information", "Who runs Acme?\nRelevant Node IDs: [n1]")
            .on("Generate a Cypher statement", "MATCH (c:Company)-[:OWNED_BY]->(o) RETURN o")
            .on("Acme -[MANAGED_BY]-> Jane Doe", "Jane Doe runs Acme."),
    );
    let fallback = Arc::new(Counting {
        inner: FallbackRetriever::new(store.clone(), snapshot.clone()),
        calls: AtomicUsize::new(0),
    });
    let pipeline = GraphRagPipeline::new(
        snapshot,
        EntityResolver::new(model.clone()),
        Arc::new(StructuredRetriever::new(model.clone(), store.clone(), GraphSchema::default())),
        fallback.clone(),
        AnswerSynthesizer::new(model),
    );

    let outcome = pipeline.answer("Who runs Acme?").await.unwrap();

    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert!(outcome.fallback_used());
    assert!(outcome.structured.is_insufficient());
    assert_eq!(outcome.result().source, RetrievalSource::Fallback);
    assert_eq!(outcome.answer, "Jane Doe runs Acme.");

    // A second turn runs it once more, not twice
    pipeline.answer("Who runs Acme?").await.unwrap();
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_both_paths_empty_still_answers() {
    let store = Arc::new(InMemoryGraphStore::new().with_node(GraphNode::new("n1", &["Company"], Some("Acme"))));
    let snapshot = NodeContextSnapshot::from_nodes(&store.query_nodes().await.unwrap());
    let model = Arc::new(
        ScriptedModel::new()
            .on("Graph Node Information", "What is the capital of Mars?\nRelevant Node IDs: []")
            .on("Generate a Cypher statement", "MATCH (p:Planet) RETURN p.capital")
            .on("No context information was found", "I cannot answer that from the graph."),
    );
    let pipeline = pipeline(model.clone(), store.clone(), snapshot, GraphSchema::default());

    let outcome = pipeline.answer("What is the capital of Mars?").await.unwrap();

    assert!(outcome.fallback_used());
    assert!(outcome.result().is_empty());
    assert_eq!(outcome.answer, "I cannot answer that from the graph.");
    assert_eq!(model.calls_matching("No context information was found"), 1);
}

#[tokio::test]
async fn test_synthesize_empty_result_is_never_empty() {
    for reply in ["I don't know.", "", "   \n"] {
        let synth = AnswerSynthesizer::new(Arc::new(ScriptedModel::new().otherwise(reply)));
        let answer = synth
            .synthesize("Who owns Acme?", &RetrievalResult::empty(RetrievalSource::Fallback))
            .await
            .unwrap();
        assert!(!answer.trim().is_empty());
        if reply.trim().is_empty() {
            assert_eq!(answer, NO_ANSWER);
        }
    }
}

#[tokio::test]
async fn test_resolution_keeps_topic() {
    let snapshot = NodeContextSnapshot::from_nodes(&[
        GraphNode::new("4:a:1", &["Company"], Some("Adani Enterprises Limited")),
        GraphNode::new("4:a:2", &["Risk"], Some("Credit risk")),
        GraphNode::new("4:a:3", &["Executive"], Some("Gautam Adani")),
    ]);
    let cases = [
        (
            "What are the risks associated with Adani Enterprises?",
            "What are the risks associated with Adani Enterprises Limited?\nRelevant Node IDs: [4:a:1, 4:a:2]",
        ),
        (
            "Who manages Adani?",
            "Answer: Who manages Adani Enterprises Limited?\nRelevant Node IDs: [\"4:a:1\"]",
        ),
        ("List every company", "List every company"),
        ("Which risks are high?", ""),
    ];

    for (question, reply) in cases {
        let resolver = EntityResolver::new(Arc::new(ScriptedModel::new().otherwise(reply)));
        let resolved = resolver.resolve(question, &snapshot).await.unwrap();
        let shared = words(question).intersection(&words(&resolved.question)).count();
        assert!(
            shared * 2 >= words(question).len(),
            "'{}' drifted to '{}'",
            question,
            resolved.question
        );
    }
}

#[tokio::test]
async fn test_cache_round_trip_is_textually_identical() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = NodeContextCache::new(dir.path().join("nodes_context.txt"));
    let store = InMemoryGraphStore::new()
        .with_node(GraphNode::new("4:b16:163", &["Company", "Listed"], Some("Adani Enterprises Limited")))
        .with_node(GraphNode::new("4:b16:170", &["Risk"], None))
        .with_node(GraphNode::new("4:b16:171", &["Executive"], Some("Line\nbreak")));

    let rebuilt = cache.rebuild(&store).await.unwrap();
    cache.persist(&rebuilt).await.unwrap();
    let loaded = cache.load().await.unwrap().unwrap();

    assert_eq!(loaded.render(), rebuilt.render());
    assert_eq!(loaded.nodes().len(), 3);
}
