//! Neighborhood retrieval
//!
//! Used when the generated query came back empty. Starting from the resolved
//! node ids that exist in the snapshot (or, failing that, nodes whose names
//! overlap the question) it
//! walks relationships breadth-first and hands the synthesizer a flat list of
//! `source -[TYPE]-> target` facts.

use super::structured::row_score;
use super::{RetrievalResult, RetrievalSource, Retriever, ScoredFragment};
use crate::cache::SnapshotSlot;
use crate::error::{with_timeout, RagResult};
use crate::graph::{GraphStore, Relation};
use crate::resolver::ResolvedQuery;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MIN_TOKEN_LEN: usize = 3;

/// Question words too common to tie a question to a node name
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "who", "what", "which", "where", "when", "why", "how", "are", "was",
    "were", "does", "did", "has", "have", "had", "with", "from", "that", "this", "these", "those",
    "about", "into", "all", "any", "its", "their", "there", "they", "them", "list", "show",
    "tell", "give", "can", "you", "your", "our", "not", "but", "per",
];

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

pub struct FallbackRetriever {
    store: Arc<dyn GraphStore>,
    snapshot: SnapshotSlot,
    depth: usize,
    max_relations: usize,
    timeout: Duration,
}

impl FallbackRetriever {
    pub fn new(store: Arc<dyn GraphStore>, snapshot: impl Into<SnapshotSlot>) -> Self {
        Self {
            store,
            snapshot: snapshot.into(),
            depth: 2,
            max_relations: 30,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_max_relations(mut self, max_relations: usize) -> Self {
        self.max_relations = max_relations;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolved ids known to the snapshot, or else snapshot nodes sharing a
    /// name token with the question
    pub fn seeds(&self, query: &ResolvedQuery) -> Vec<String> {
        let Some(snapshot) = self.snapshot.get() else {
            return query.node_ids.clone();
        };
        let nodes = snapshot.nodes();

        let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let ids: Vec<String> = query
            .node_ids
            .iter()
            .filter(|id| known.contains(id.as_str()))
            .cloned()
            .collect();
        if ids.len() < query.node_ids.len() {
            debug!(
                dropped = query.node_ids.len() - ids.len(),
                "ignoring resolved ids missing from the node context"
            );
        }
        if !ids.is_empty() {
            return ids;
        }

        let question = tokens(&query.question);
        if question.is_empty() {
            return Vec::new();
        }
        nodes
            .into_iter()
            .filter(|node| {
                node.name
                    .as_deref()
                    .map(|name| !tokens(name).is_disjoint(&question))
                    .unwrap_or(false)
            })
            .map(|node| node.id)
            .collect()
    }

    /// Breadth-first expansion from `seeds`, at most `max_relations` relations
    pub async fn expand(&self, seeds: &[String]) -> RagResult<Vec<Relation>> {
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut relations = Vec::new();
        let mut frontier: Vec<String> = seeds.to_vec();

        for level in 0..self.depth {
            if frontier.is_empty() || relations.len() >= self.max_relations {
                break;
            }
            let remaining = self.max_relations - relations.len();
            let found = with_timeout(
                "neighborhood expansion",
                self.timeout,
                self.store.adjacent_relations(&frontier, remaining),
            )
            .await?;
            debug!(level, frontier = frontier.len(), found = found.len(), "expanded neighborhood");

            let mut next = Vec::new();
            for rel in found {
                let key = (rel.source.id.clone(), rel.rel_type.clone(), rel.target.id.clone());
                if !seen.insert(key) {
                    continue;
                }
                for id in [&rel.source.id, &rel.target.id] {
                    if visited.insert(id.clone()) {
                        next.push(id.clone());
                    }
                }
                relations.push(rel);
                if relations.len() >= self.max_relations {
                    break;
                }
            }
            frontier = next;
        }
        Ok(relations)
    }
}

#[async_trait]
impl Retriever for FallbackRetriever {
    fn source(&self) -> RetrievalSource {
        RetrievalSource::Fallback
    }

    async fn retrieve(&self, query: &ResolvedQuery) -> RagResult<RetrievalResult> {
        let seeds = self.seeds(query);
        if seeds.is_empty() {
            debug!("no seed nodes for fallback traversal");
            return Ok(RetrievalResult::empty(RetrievalSource::Fallback));
        }

        let relations = match self.expand(&seeds).await {
            Ok(relations) => relations,
            Err(e) => {
                warn!("fallback traversal failed: {}", e);
                return Ok(RetrievalResult::empty(RetrievalSource::Fallback));
            }
        };
        if relations.is_empty() {
            return Ok(RetrievalResult::empty(RetrievalSource::Fallback));
        }

        let description = format!(
            "Neighborhood of [{}] (depth {}, {} relations)",
            seeds.join(", "),
            self.depth,
            relations.len()
        );
        let response = relations
            .iter()
            .map(|r| r.render())
            .collect::<Vec<_>>()
            .join("\n");
        let fragment = ScoredFragment::new(description, response, row_score(relations.len()));
        Ok(RetrievalResult::new(RetrievalSource::Fallback, vec![fragment]))
    }
}
