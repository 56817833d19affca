//! Graph store boundary
//!
//! The pipeline never interprets query results structurally: it enumerates
//! node identities for grounding, runs generated Cypher and renders whatever
//! comes back as text, and walks neighborhoods for the fallback path.
//!
//! - [`RemoteGraphStore`] talks to an HTTP Cypher endpoint (Samyama or Neo4j).
//! - [`InMemoryGraphStore`] is an embedded fixture store for tests and demos.

pub mod memory;
pub mod remote;

pub use memory::InMemoryGraphStore;
pub use remote::RemoteGraphStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    /// Query rejected or failed inside the store
    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The store cannot answer this kind of request
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Identity of one graph node as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Store-assigned opaque identifier
    pub id: String,
    pub labels: Vec<String>,
    /// Value of the `name` property, if any
    pub name: Option<String>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, labels: &[&str], name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            name: name.map(|n| n.to_string()),
        }
    }

    /// Name when present and non-blank, otherwise the identifier
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.id,
        }
    }
}

/// One directed relationship found while expanding a neighborhood
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub source: GraphNode,
    pub rel_type: String,
    pub target: GraphNode,
}

impl Relation {
    /// `Acme -[OWNED_BY]-> Jane Doe`
    pub fn render(&self) -> String {
        format!(
            "{} -[{}]-> {}",
            self.source.display_name(),
            self.rel_type,
            self.target.display_name()
        )
    }
}

/// Tabular response to a structured query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub records: Vec<Vec<serde_json::Value>>,
}

impl TabularResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One JSON object per row keyed by column name; empty string for no rows
    pub fn render(&self) -> String {
        self.records
            .iter()
            .map(|row| {
                let object: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                serde_json::Value::Object(object).to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `(:Company)-[:HAS_RISK]->(:Risk)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipPattern {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

/// Labels, their property keys, and the relationship patterns between them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
    pub node_properties: BTreeMap<String, BTreeSet<String>>,
    pub relationships: BTreeSet<RelationshipPattern>,
}

impl GraphSchema {
    pub fn is_empty(&self) -> bool {
        self.node_properties.is_empty() && self.relationships.is_empty()
    }

    /// Keep only labels and relationship types named in `allowed`.
    ///
    /// An empty allow-list keeps everything.
    pub fn restrict_to(&self, allowed: &[String]) -> GraphSchema {
        if allowed.is_empty() {
            return self.clone();
        }
        let allowed: BTreeSet<&str> = allowed.iter().map(|s| s.as_str()).collect();

        GraphSchema {
            node_properties: self
                .node_properties
                .iter()
                .filter(|(label, _)| allowed.contains(label.as_str()))
                .map(|(label, props)| (label.clone(), props.clone()))
                .collect(),
            relationships: self
                .relationships
                .iter()
                .filter(|p| {
                    allowed.contains(p.rel_type.as_str())
                        && allowed.contains(p.from.as_str())
                        && allowed.contains(p.to.as_str())
                })
                .cloned()
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Node properties:\n");
        for (label, props) in &self.node_properties {
            let props: Vec<&str> = props.iter().map(|p| p.as_str()).collect();
            out.push_str(&format!("{} {{{}}}\n", label, props.join(", ")));
        }
        out.push_str("Relationships:\n");
        for p in &self.relationships {
            out.push_str(&format!("(:{})-[:{}]->(:{})\n", p.from, p.rel_type, p.to));
        }
        out
    }
}

/// Store operations the pipeline depends on
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Enumerate every node's identity
    async fn query_nodes(&self) -> GraphResult<Vec<GraphNode>>;

    /// Run a Cypher query verbatim
    async fn execute_structured_query(&self, query: &str) -> GraphResult<TabularResult>;

    /// Describe labels, properties and relationship patterns
    async fn schema(&self) -> GraphResult<GraphSchema>;

    /// Relationships touching any of `node_ids`, in either direction, at most `limit`
    async fn adjacent_relations(&self, node_ids: &[String], limit: usize) -> GraphResult<Vec<Relation>>;
}
