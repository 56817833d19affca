//! Answer synthesis
//!
//! One completion over the top-ranked fragments' response sections. The
//! prompt restricts the model to that context, and when retrieval found
//! nothing it asks for an explicit "cannot answer" instead of a guess.

use crate::error::{with_timeout, RagResult};
use crate::llm::LanguageModel;
use crate::retrieval::RetrievalResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Returned in place of a blank completion
pub const NO_ANSWER: &str = "I could not find an answer to that question in the knowledge graph.";

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    top_k: usize,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            top_k: 5,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Non-blank response sections of the top-k fragments, best first
    pub fn context(&self, result: &RetrievalResult) -> String {
        result
            .top(self.top_k)
            .iter()
            .map(|f| f.response_section())
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn build_prompt(&self, question: &str, result: &RetrievalResult) -> String {
        let context = self.context(result);
        if context.is_empty() {
            return format!(
                "No context information was found in the knowledge graph for the query below.\n\
                 Do not use prior knowledge and do not guess. Reply that you cannot answer \
                 this question from the available data.\n\
                 Query: {}\n\
                 Answer: ",
                question
            );
        }
        format!(
            "Context information is below.\n\
             ---------------------\n\
             {}\n\
             ---------------------\n\
             Given the context information and not prior knowledge, answer the query.\n\
             Query: {}\n\
             Answer: ",
            context, question
        )
    }

    pub async fn synthesize(&self, question: &str, result: &RetrievalResult) -> RagResult<String> {
        let prompt = self.build_prompt(question, result);
        let answer = with_timeout("answer synthesis", self.timeout, self.model.complete(&prompt)).await?;
        // Returned as the model wrote it; only a blank answer is replaced
        if answer.trim().is_empty() {
            warn!("model returned a blank answer");
            return Ok(NO_ANSWER.to_string());
        }
        Ok(answer)
    }
}
