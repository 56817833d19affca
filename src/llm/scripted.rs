//! Deterministic language model for tests and offline demos

use crate::llm::{LanguageModel, LlmError, LlmResult};
use async_trait::async_trait;
use std::sync::Mutex;

enum Reply {
    Text(String),
    Fail(String),
}

/// Replies chosen by the first rule whose needle occurs in the prompt.
///
/// Every prompt is recorded so callers can assert how many completions a
/// turn issued and what they contained.
pub struct ScriptedModel {
    rules: Vec<(String, Reply)>,
    otherwise: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            otherwise: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` when the prompt contains `needle`
    pub fn on(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(text.into())));
        self
    }

    /// Fail with an API error when the prompt contains `needle`
    pub fn fail_on(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail(message.into())));
        self
    }

    /// Reply used when no rule matches
    pub fn otherwise(mut self, text: impl Into<String>) -> Self {
        self.otherwise = Some(text.into());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Number of recorded prompts containing `needle`
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        for (needle, reply) in &self.rules {
            if prompt.contains(needle.as_str()) {
                return match reply {
                    Reply::Text(text) => Ok(text.clone()),
                    Reply::Fail(message) => Err(LlmError::ApiError(message.clone())),
                };
            }
        }

        self.otherwise
            .clone()
            .ok_or_else(|| LlmError::ApiError("no scripted reply for prompt".to_string()))
    }
}
