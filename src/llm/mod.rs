//! Language model boundary
//!
//! The pipeline only ever needs plain-text completion. [`LlmClient`] talks to
//! hosted or local providers over HTTP; [`ScriptedModel`] answers from a fixed
//! script and is used by tests and offline demos.

pub mod client;
pub mod scripted;

pub use client::LlmClient;
pub use scripted::ScriptedModel;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM API error: {0}")]
    ApiError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Black-box text completion service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`, returning the raw model text
    async fn complete(&self, prompt: &str) -> LlmResult<String>;
}
