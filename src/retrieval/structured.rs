//! Text-to-Cypher retrieval
//!
//! One completion turns the resolved question into Cypher, one store call
//! executes it. Anything that goes wrong after the completion (an unparseable
//! query, a validator rejection, a store error) degrades to an empty fragment
//! so the pipeline can move on to the fallback path.

use super::{QueryValidator, RetrievalResult, RetrievalSource, Retriever, ScoredFragment};
use crate::error::{with_timeout, RagError, RagResult};
use crate::graph::{GraphSchema, GraphStore};
use crate::llm::LanguageModel;
use crate::resolver::ResolvedQuery;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Default text-to-Cypher prompt; `{schema}` and `{question}` are substituted
pub const DEFAULT_CYPHER_TEMPLATE: &str = "Task: Generate a Cypher statement to query a graph database.
Instructions:
Use only the provided relationship types and properties in the schema.
Do not use any other relationship types or properties that are not provided.
Schema:
{schema}
Note: Do not include any explanations or apologies in your responses.
Do not respond to any questions that might ask anything else than for you to construct a Cypher statement.
Do not include any text except the generated Cypher statement.

The question is:
{question}
";

/// A line that opens a statement: the clause keyword as a whole word, followed
/// by what that clause takes (a pattern, a procedure, a projection).
static CLAUSE_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:OPTIONAL\s+)?MATCH\s*(?:[a-z_]\w*\s*=\s*)?\(|UNWIND\s+\S.*\s+AS\s+[a-z_]\w*|CALL\s*(?:\{|[a-z_][\w.]*\s*\()|(?:WITH|RETURN)\s+(?:DISTINCT\s+)?(?:\*|[^\s,]+)\s*(?:,|(?:AS|ORDER|SKIP|LIMIT|WHERE)\b|$))",
    )
    .unwrap()
});

fn opens_clause(line: &str) -> bool {
    CLAUSE_START_RE.is_match(line)
}

/// Pull a Cypher statement out of a completion that may carry markdown
/// fences or surrounding prose.
pub fn extract_cypher(response: &str) -> String {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip the language tag line ("cypher\n")
        let code_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after_fence[code_start..].find("```") {
            return after_fence[code_start..code_start + end].trim().to_string();
        }
    }

    // From the first line that opens a clause up to the next blank line,
    // keeping continuation lines such as `-[:HAS_RISK]->(r)`.
    let lines: Vec<&str> = trimmed.lines().collect();
    if let Some(first) = lines.iter().position(|l| opens_clause(l)) {
        return lines[first..]
            .iter()
            .take_while(|l| !l.trim().is_empty())
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end_matches("```")
            .trim()
            .to_string();
    }

    trimmed
        .trim_start_matches("```cypher")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}

/// `rows / (rows + 1)`: zero for no rows, approaching one as rows grow
pub fn row_score(rows: usize) -> f32 {
    rows as f32 / (rows as f32 + 1.0)
}

pub struct StructuredRetriever {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn GraphStore>,
    schema: GraphSchema,
    template: String,
    validator: Option<Arc<dyn QueryValidator>>,
    llm_timeout: Duration,
    store_timeout: Duration,
}

impl StructuredRetriever {
    /// `schema` should already be restricted to the allowed fields
    pub fn new(model: Arc<dyn LanguageModel>, store: Arc<dyn GraphStore>, schema: GraphSchema) -> Self {
        Self {
            model,
            store,
            schema,
            template: DEFAULT_CYPHER_TEMPLATE.to_string(),
            validator: None,
            llm_timeout: Duration::from_secs(120),
            store_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn QueryValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_timeouts(mut self, llm: Duration, store: Duration) -> Self {
        self.llm_timeout = llm;
        self.store_timeout = store;
        self
    }

    pub fn schema(&self) -> &GraphSchema {
        &self.schema
    }

    pub fn build_prompt(&self, question: &str) -> String {
        self.template
            .replace("{schema}", &self.schema.render())
            .replace("{question}", question)
    }

    /// Generate Cypher for `question`; model errors propagate
    pub async fn generate_query(&self, question: &str) -> RagResult<String> {
        let prompt = self.build_prompt(question);
        let raw = with_timeout("cypher generation", self.llm_timeout, self.model.complete(&prompt)).await?;
        Ok(extract_cypher(&raw))
    }

    /// Validate and run `cypher`, returning the rendered rows and their count
    async fn run_query(&self, cypher: &str) -> RagResult<(String, usize)> {
        if cypher.is_empty() {
            return Err(RagError::QueryExecutionFailed("model produced no query".to_string()));
        }
        if let Some(validator) = &self.validator {
            validator
                .validate(cypher)
                .map_err(|reason| RagError::QueryExecutionFailed(format!("rejected: {}", reason)))?;
        }
        let table = with_timeout(
            "structured query",
            self.store_timeout,
            self.store.execute_structured_query(cypher),
        )
        .await
        .map_err(|e| RagError::QueryExecutionFailed(e.to_string()))?;
        Ok((table.render(), table.len()))
    }
}

#[async_trait]
impl Retriever for StructuredRetriever {
    fn source(&self) -> RetrievalSource {
        RetrievalSource::Structured
    }

    async fn retrieve(&self, query: &ResolvedQuery) -> RagResult<RetrievalResult> {
        let cypher = self.generate_query(&query.question).await?;
        debug!(%cypher, "generated query");

        let fragment = match self.run_query(&cypher).await {
            Ok((response, rows)) => ScoredFragment::new(cypher, response, row_score(rows)),
            Err(e) => {
                warn!("{}", e);
                ScoredFragment::empty(cypher)
            }
        };
        Ok(RetrievalResult::new(RetrievalSource::Structured, vec![fragment]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, InMemoryGraphStore, TabularResult};
    use crate::llm::ScriptedModel;
    use crate::retrieval::ReadOnlyValidator;
    use serde_json::json;

    const RISK_QUERY: &str = "MATCH (c:Company {name: 'Acme Corp'})-[:HAS_RISK]->(r:Risk) RETURN r.type, r.value";

    fn store() -> InMemoryGraphStore {
        InMemoryGraphStore::new()
            .with_node(GraphNode::new("n1", &["Company"], Some("Acme Corp")))
            .with_node(GraphNode::new("n2", &["Risk"], None))
            .with_edge("n1", "HAS_RISK", "n2")
            .with_query_result(
                RISK_QUERY,
                TabularResult {
                    columns: vec!["r.type".into(), "r.value".into()],
                    records: vec![vec![json!("Credit"), json!("High")], vec![json!("Market"), json!("Low")]],
                },
            )
    }

    fn question(text: &str) -> ResolvedQuery {
        ResolvedQuery::passthrough(text)
    }

    #[test]
    fn test_extract_from_fence() {
        let response = "Here is the query:\n```cypher\nMATCH (n:Company)\nRETURN n.name\n```\nHope it helps";
        assert_eq!(extract_cypher(response), "MATCH (n:Company)\nRETURN n.name");
    }

    #[test]
    fn test_extract_keeps_continuation_lines() {
        let response = "Sure.\nMATCH (c:Company)\n  -[:HAS_RISK]->(r:Risk)\nRETURN r.type\n\nThis returns risk types.";
        assert_eq!(extract_cypher(response), "MATCH (c:Company) -[:HAS_RISK]->(r:Risk) RETURN r.type");
    }

    #[test]
    fn test_extract_skips_prose_starting_with_keyword_words() {
        assert_eq!(
            extract_cypher("With the schema given, the query is:\nMATCH (c:Company) RETURN c.name"),
            "MATCH (c:Company) RETURN c.name"
        );
        assert_eq!(
            extract_cypher("Matching companies are listed by this query.\nMATCH (c:Company)\nRETURN c.name"),
            "MATCH (c:Company) RETURN c.name"
        );
        assert_eq!(
            extract_cypher("Return the names like so:\nOPTIONAL MATCH p = (c:Company)-->() RETURN p"),
            "OPTIONAL MATCH p = (c:Company)-->() RETURN p"
        );
        assert_eq!(extract_cypher("Call me old-fashioned, but:\nCALL db.labels()"), "CALL db.labels()");
    }

    #[test]
    fn test_extract_statement_opening_with_projection() {
        assert_eq!(extract_cypher("WITH 1 AS x RETURN x"), "WITH 1 AS x RETURN x");
        assert_eq!(
            extract_cypher("Query:\nWITH c, count(r) AS risks\nRETURN c"),
            "WITH c, count(r) AS risks RETURN c"
        );
        assert_eq!(
            extract_cypher("Use this.\nUNWIND ['Acme', 'Globex'] AS name\nRETURN name"),
            "UNWIND ['Acme', 'Globex'] AS name RETURN name"
        );
    }

    #[test]
    fn test_extract_plain() {
        assert_eq!(extract_cypher("  MATCH (n) RETURN n  "), "MATCH (n) RETURN n");
        assert_eq!(extract_cypher("I cannot help"), "I cannot help");
    }

    #[test]
    fn test_row_score() {
        assert_eq!(row_score(0), 0.0);
        assert_eq!(row_score(1), 0.5);
        assert!(row_score(9) > row_score(3));
        assert!(row_score(1000) < 1.0);
    }

    #[test]
    fn test_prompt_substitution() {
        let schema = GraphSchema::default();
        let retriever = StructuredRetriever::new(Arc::new(ScriptedModel::new()), Arc::new(store()), schema)
            .with_template("S={schema} Q={question}");
        let prompt = retriever.build_prompt("Who?");
        assert!(prompt.starts_with("S=Node properties:"));
        assert!(prompt.ends_with("Q=Who?"));
    }

    #[tokio::test]
    async fn test_retrieve_rows() {
        let store = Arc::new(store());
        let schema = store.schema().await.unwrap();
        let model = Arc::new(ScriptedModel::new().on("Generate a Cypher statement", RISK_QUERY));
        let retriever = StructuredRetriever::new(model, store.clone(), schema);

        let result = retriever.retrieve(&question("What risks does Acme Corp face?")).await.unwrap();
        assert_eq!(result.source, RetrievalSource::Structured);
        assert_eq!(result.len(), 1);

        let fragment = &result.fragments()[0];
        assert_eq!(fragment.query, RISK_QUERY);
        assert!(fragment.response.contains("Credit"));
        assert!((fragment.score - 2.0 / 3.0).abs() < 1e-6);
        assert!(!result.is_insufficient());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_empty_fragment() {
        let model = Arc::new(ScriptedModel::new().otherwise("MATCH (x:Unknown) RETURN x"));
        let retriever = StructuredRetriever::new(model, Arc::new(store()), GraphSchema::default());

        let result = retriever.retrieve(&question("anything")).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.fragments()[0].score, 0.0);
        assert!(result.is_insufficient());
    }

    #[tokio::test]
    async fn test_validator_rejection_skips_store() {
        let store = Arc::new(store());
        let model = Arc::new(ScriptedModel::new().otherwise("MATCH (n) DETACH DELETE n"));
        let retriever = StructuredRetriever::new(model, store.clone(), GraphSchema::default())
            .with_validator(Arc::new(ReadOnlyValidator));

        let result = retriever.retrieve(&question("drop everything")).await.unwrap();
        assert!(result.is_insufficient());
        assert_eq!(store.structured_query_count(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let model = Arc::new(ScriptedModel::new().fail_on("Cypher", "rate limited"));
        let retriever = StructuredRetriever::new(model, Arc::new(store()), GraphSchema::default());
        assert!(matches!(retriever.retrieve(&question("q")).await, Err(RagError::Llm(_))));
    }
}
