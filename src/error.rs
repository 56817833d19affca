//! Error types for the retrieval pipeline
//!
//! Every variant except `Config` is recoverable at the session boundary: the
//! turn fails, the loop reports it and goes back to waiting for input.

use crate::graph::GraphError;
use crate::llm::LlmError;
use thiserror::Error;

/// Errors produced by the pipeline components
#[derive(Error, Debug)]
pub enum RagError {
    /// No persisted node context and the store could not enumerate nodes
    #[error("Grounding unavailable: {0}")]
    GroundingUnavailable(String),

    /// Resolver output did not follow the `Relevant Node IDs:` contract
    #[error("Malformed resolution output: {0}")]
    ResolutionMalformed(String),

    /// Store rejected or failed a generated query
    #[error("Query execution failed: {0}")]
    QueryExecutionFailed(String),

    /// Neither retriever produced usable context
    #[error("Both retrieval paths returned no context")]
    FallbackExhausted,

    /// The node context file could not be written
    #[error("Failed to persist node context: {0}")]
    PersistenceFailed(String),

    /// Language model call failed
    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),

    /// Graph store call failed
    #[error("Graph store error: {0}")]
    Store(#[from] GraphError),

    /// An external call exceeded its deadline
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: String,
        seconds: u64,
    },

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Whether this error should stop the process rather than just the turn
    pub fn is_fatal(&self) -> bool {
        matches!(self, RagError::Config(_))
    }
}

pub type RagResult<T> = Result<T, RagError>;

/// Run `fut` under a deadline, mapping expiry to [`RagError::Timeout`].
pub(crate) async fn with_timeout<T, E, F>(
    operation: &str,
    limit: std::time::Duration,
    fut: F,
) -> RagResult<T>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: Into<RagError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(RagError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}
