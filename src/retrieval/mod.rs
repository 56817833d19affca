//! Two-stage retrieval
//!
//! [`StructuredRetriever`] asks the model for a Cypher query and runs it.
//! When that produces nothing usable, [`FallbackRetriever`] walks the
//! neighborhood of the resolved entities instead. Both return the same
//! [`RetrievalResult`] shape so synthesis does not care which one ran.

pub mod fallback;
pub mod structured;
pub mod validator;

pub use fallback::FallbackRetriever;
pub use structured::StructuredRetriever;
pub use validator::{AllowListValidator, CompositeValidator, QueryValidator, ReadOnlyValidator};

use crate::error::RagResult;
use crate::resolver::ResolvedQuery;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const QUERY_HEADER: &str = "Generated Cypher query:\n";
const RESPONSE_HEADER: &str = "\n\nCypher Response:\n";

/// Which retrieval path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalSource {
    Structured,
    Fallback,
}

/// One query and what the store returned for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFragment {
    pub query: String,
    pub response: String,
    pub score: f32,
}

impl ScoredFragment {
    pub fn new(query: impl Into<String>, response: impl Into<String>, score: f32) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            score,
        }
    }

    /// Fragment for a query that produced no content
    pub fn empty(query: impl Into<String>) -> Self {
        Self::new(query, String::new(), 0.0)
    }

    /// `Generated Cypher query:\n{query}\n\nCypher Response:\n{response}`
    pub fn text(&self) -> String {
        format!("{}{}{}{}", QUERY_HEADER, self.query, RESPONSE_HEADER, self.response)
    }

    /// Split fragment text back into `(query, response)` on the template headers
    pub fn split_text(text: &str) -> (String, String) {
        let query_start = text
            .find(QUERY_HEADER)
            .map(|i| i + QUERY_HEADER.len())
            .unwrap_or(0);
        match text[query_start..].find(RESPONSE_HEADER) {
            Some(offset) => {
                let query_end = query_start + offset;
                (
                    text[query_start..query_end].trim().to_string(),
                    text[query_end + RESPONSE_HEADER.len()..].trim().to_string(),
                )
            }
            None => (text[query_start..].trim().to_string(), String::new()),
        }
    }

    /// Response section as parsed from the rendered text
    pub fn response_section(&self) -> String {
        Self::split_text(&self.text()).1
    }
}

/// Fragments ordered by descending score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub source: RetrievalSource,
    fragments: Vec<ScoredFragment>,
}

impl RetrievalResult {
    pub fn new(source: RetrievalSource, mut fragments: Vec<ScoredFragment>) -> Self {
        fragments.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Self { source, fragments }
    }

    pub fn empty(source: RetrievalSource) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn fragments(&self) -> &[ScoredFragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Empty, or every fragment's response section is blank
    pub fn is_insufficient(&self) -> bool {
        self.fragments
            .iter()
            .all(|f| f.response_section().trim().is_empty())
    }

    /// Highest-scoring `k` fragments, best first
    pub fn top(&self, k: usize) -> &[ScoredFragment] {
        &self.fragments[..k.min(self.fragments.len())]
    }
}

/// A retrieval strategy over the graph
#[async_trait]
pub trait Retriever: Send + Sync {
    fn source(&self) -> RetrievalSource;

    async fn retrieve(&self, query: &ResolvedQuery) -> RagResult<RetrievalResult>;
}
