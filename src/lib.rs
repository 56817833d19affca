//! kg-rag
//!
//! Entity-grounded question answering over a property graph. A question is
//! restated against the real node identities in the graph, translated into
//! Cypher and executed; when that yields nothing, the neighborhood of the
//! resolved entities is used instead. The retrieved text is then handed to a
//! language model to produce the answer.
//!
//! # Components
//!
//! - [`cache`]: one-line-per-node snapshot of the graph, persisted to disk
//! - [`resolver`]: question + snapshot → refined question and node ids
//! - [`retrieval`]: text-to-Cypher retrieval and the traversal fallback
//! - [`synth`]: answer synthesis over the top-ranked fragments
//! - [`pipeline`]: one turn through all of the above
//! - [`session`]: the interactive loop driven by the `kg-rag` binary
//!
//! External collaborators sit behind two traits: [`LanguageModel`] and
//! [`GraphStore`].
//!
//! ## Example Usage
//!
//! ```rust
//! use kg_rag::ResolvedQuery;
//!
//! let resolved = ResolvedQuery::parse(
//!     "Who owns Acme Corporation?\nRelevant Node IDs: [4:b16:163, 4:b16:170]",
//! );
//! assert_eq!(resolved.question, "Who owns Acme Corporation?");
//! assert_eq!(resolved.node_ids, vec!["4:b16:163", "4:b16:170"]);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod resolver;
pub mod retrieval;
pub mod session;
pub mod synth;

// Re-export main types for convenience
pub use cache::{NodeContextCache, NodeContextSnapshot, SnapshotSlot};
pub use config::{CacheConfig, LLMProvider, LlmConfig, RagConfig, RetrievalConfig, StoreConfig, StoreDialect};
pub use error::{RagError, RagResult};
pub use graph::{
    GraphError, GraphNode, GraphResult, GraphSchema, GraphStore, InMemoryGraphStore, Relation,
    RemoteGraphStore, TabularResult,
};
pub use llm::{LanguageModel, LlmClient, LlmError, LlmResult, ScriptedModel};
pub use pipeline::{GraphRagPipeline, TurnOutcome};
pub use resolver::{EntityResolver, ResolvedQuery, NODE_IDS_MARKER};
pub use retrieval::{
    FallbackRetriever, QueryValidator, RetrievalResult, RetrievalSource, Retriever, ScoredFragment,
    StructuredRetriever,
};
pub use session::{Session, SessionState};
pub use synth::AnswerSynthesizer;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
