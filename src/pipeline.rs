//! Single-turn orchestration
//!
//! resolve → structured retrieval → (fallback, at most once) → synthesis.
//! The stages are exposed individually so the session can report which one
//! it is in; [`GraphRagPipeline::answer`] runs them back to back.

use crate::cache::{NodeContextCache, NodeContextSnapshot, SnapshotSlot};
use crate::config::RagConfig;
use crate::error::{with_timeout, RagError, RagResult};
use crate::graph::GraphStore;
use crate::llm::LanguageModel;
use crate::resolver::{EntityResolver, ResolvedQuery};
use crate::retrieval::{
    AllowListValidator, CompositeValidator, FallbackRetriever, ReadOnlyValidator, RetrievalResult,
    Retriever, StructuredRetriever,
};
use crate::synth::AnswerSynthesizer;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything one question produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub resolved: ResolvedQuery,
    pub structured: RetrievalResult,
    /// Present only when the structured result was insufficient
    pub fallback: Option<RetrievalResult>,
    pub answer: String,
}

impl TurnOutcome {
    pub fn fallback_used(&self) -> bool {
        self.fallback.is_some()
    }

    /// The result synthesis was given
    pub fn result(&self) -> &RetrievalResult {
        self.fallback.as_ref().unwrap_or(&self.structured)
    }
}

/// Where an empty [`SnapshotSlot`] gets filled from
struct SnapshotLoader {
    cache: NodeContextCache,
    store: Arc<dyn GraphStore>,
}

pub struct GraphRagPipeline {
    snapshot: SnapshotSlot,
    loader: Option<SnapshotLoader>,
    resolver: EntityResolver,
    structured: Arc<dyn Retriever>,
    fallback: Arc<dyn Retriever>,
    synthesizer: AnswerSynthesizer,
}

impl GraphRagPipeline {
    pub fn new(
        snapshot: impl Into<SnapshotSlot>,
        resolver: EntityResolver,
        structured: Arc<dyn Retriever>,
        fallback: Arc<dyn Retriever>,
        synthesizer: AnswerSynthesizer,
    ) -> Self {
        Self {
            snapshot: snapshot.into(),
            loader: None,
            resolver,
            structured,
            fallback,
            synthesizer,
        }
    }

    /// Wire every component from `config`.
    ///
    /// Fetches the graph schema and tries to load (or build) the node context
    /// snapshot. An unreachable store is a configuration error here. A
    /// snapshot that cannot be built yet is not: every turn retries it until
    /// one succeeds.
    pub async fn from_config(
        config: &RagConfig,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn GraphStore>,
    ) -> RagResult<Self> {
        let store_timeout = config.store.timeout();
        let llm_timeout = config.llm.timeout();

        let schema = with_timeout("schema fetch", store_timeout, store.schema())
            .await
            .map_err(|e| RagError::Config(format!("cannot read graph schema: {}", e)))?;
        let schema = schema.restrict_to(&config.retrieval.allowed_fields);
        info!(
            "Graph schema: {} labels, {} relationship patterns",
            schema.node_properties.len(),
            schema.relationships.len()
        );

        let cache = NodeContextCache::new(config.cache.path.clone()).with_timeout(store_timeout);
        let snapshot = SnapshotSlot::empty();
        match snapshot.get_or_load(&cache, store.as_ref()).await {
            Ok(loaded) => debug!("node context loaded with {} nodes", loaded.len()),
            Err(e) => warn!("{}; retrying before the next question", e),
        }

        let mut structured = StructuredRetriever::new(model.clone(), store.clone(), schema)
            .with_timeouts(llm_timeout, store_timeout);
        if config.retrieval.validate_queries {
            let mut validator = CompositeValidator::new().with(Arc::new(ReadOnlyValidator));
            if !config.retrieval.allowed_fields.is_empty() {
                validator = validator.with(Arc::new(AllowListValidator::new(
                    config.retrieval.allowed_fields.iter().cloned(),
                )));
            }
            structured = structured.with_validator(Arc::new(validator));
        }

        let fallback = FallbackRetriever::new(store.clone(), snapshot.clone())
            .with_depth(config.retrieval.fallback_depth)
            .with_max_relations(config.retrieval.fallback_max_relations)
            .with_timeout(store_timeout);

        let mut pipeline = Self::new(
            snapshot,
            EntityResolver::new(model.clone()).with_timeout(llm_timeout),
            Arc::new(structured),
            Arc::new(fallback),
            AnswerSynthesizer::new(model)
                .with_top_k(config.retrieval.top_k)
                .with_timeout(llm_timeout),
        );
        pipeline.loader = Some(SnapshotLoader { cache, store });
        Ok(pipeline)
    }

    /// The node context, if it has been loaded
    pub fn snapshot(&self) -> Option<Arc<NodeContextSnapshot>> {
        self.snapshot.get()
    }

    /// The node context, loading it first if an earlier attempt failed
    pub async fn ensure_snapshot(&self) -> RagResult<Arc<NodeContextSnapshot>> {
        match &self.loader {
            Some(loader) => self.snapshot.get_or_load(&loader.cache, loader.store.as_ref()).await,
            None => self
                .snapshot
                .get()
                .ok_or_else(|| RagError::GroundingUnavailable("node context not loaded".to_string())),
        }
    }

    pub async fn resolve(&self, question: &str) -> RagResult<ResolvedQuery> {
        let snapshot = self.ensure_snapshot().await?;
        self.resolver.resolve(question, &snapshot).await
    }

    /// Structured retrieval, then fallback exactly once if it came back insufficient
    pub async fn retrieve(&self, resolved: &ResolvedQuery) -> RagResult<(RetrievalResult, Option<RetrievalResult>)> {
        let structured = self.structured.retrieve(resolved).await?;
        if !structured.is_insufficient() {
            return Ok((structured, None));
        }

        info!("structured retrieval returned no content; falling back to graph traversal");
        let fallback = self.fallback.retrieve(resolved).await?;
        if fallback.is_insufficient() {
            warn!("{}", RagError::FallbackExhausted);
        }
        Ok((structured, Some(fallback)))
    }

    pub async fn synthesize(&self, resolved: &ResolvedQuery, result: &RetrievalResult) -> RagResult<String> {
        self.synthesizer.synthesize(&resolved.question, result).await
    }

    pub async fn answer(&self, question: &str) -> RagResult<TurnOutcome> {
        let resolved = self.resolve(question).await?;
        let (structured, fallback) = self.retrieve(&resolved).await?;
        let answer = self
            .synthesize(&resolved, fallback.as_ref().unwrap_or(&structured))
            .await?;
        Ok(TurnOutcome {
            resolved,
            structured,
            fallback,
            answer,
        })
    }
}
