//! InMemoryGraphStore: embedded store for tests and offline demos
//!
//! Holds nodes and typed edges directly. It does not parse Cypher: structured
//! queries are answered from results registered ahead of time, matched on the
//! whitespace-normalized query text.

use crate::graph::{
    GraphError, GraphNode, GraphResult, GraphSchema, GraphStore, Relation, RelationshipPattern,
    TabularResult,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: Vec<GraphNode>,
    edges: Vec<(String, String, String)>,
    query_results: HashMap<String, TabularResult>,
    unavailable: bool,
    enumeration_failures: AtomicUsize,
    structured_calls: AtomicUsize,
    traversal_calls: AtomicUsize,
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a directed `source -[rel_type]-> target` edge between existing node ids
    pub fn with_edge(mut self, source: &str, rel_type: &str, target: &str) -> Self {
        self.edges
            .push((source.to_string(), rel_type.to_string(), target.to_string()));
        self
    }

    /// Answer `query` with `result`
    pub fn with_query_result(mut self, query: &str, result: TabularResult) -> Self {
        self.query_results.insert(normalize(query), result);
        self
    }

    /// Make every call fail as if the store were unreachable
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Fail the next `times` node enumerations while everything else keeps working
    pub fn failing_enumeration(self, times: usize) -> Self {
        self.enumeration_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Structured queries executed so far
    pub fn structured_query_count(&self) -> usize {
        self.structured_calls.load(Ordering::SeqCst)
    }

    /// Neighborhood expansions served so far
    pub fn traversal_count(&self) -> usize {
        self.traversal_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> GraphResult<()> {
        if self.unavailable {
            Err(GraphError::ConnectionError("in-memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn node(&self, id: &str) -> GraphNode {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .unwrap_or_else(|| GraphNode {
                id: id.to_string(),
                labels: Vec::new(),
                name: None,
            })
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn query_nodes(&self) -> GraphResult<Vec<GraphNode>> {
        self.check_available()?;
        let failing = self
            .enumeration_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GraphError::ConnectionError("enumeration timed out".to_string()));
        }
        Ok(self.nodes.clone())
    }

    async fn execute_structured_query(&self, query: &str) -> GraphResult<TabularResult> {
        self.check_available()?;
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        self.query_results
            .get(&normalize(query))
            .cloned()
            .ok_or_else(|| GraphError::Unsupported(format!("no registered result for: {}", query)))
    }

    async fn schema(&self) -> GraphResult<GraphSchema> {
        self.check_available()?;
        let mut schema = GraphSchema::default();
        for node in &self.nodes {
            for label in &node.labels {
                let props = schema.node_properties.entry(label.clone()).or_default();
                if node.name.is_some() {
                    props.insert("name".to_string());
                }
            }
        }
        for (source, rel_type, target) in &self.edges {
            let (source, target) = (self.node(source), self.node(target));
            for from in &source.labels {
                for to in &target.labels {
                    schema.relationships.insert(RelationshipPattern {
                        from: from.clone(),
                        rel_type: rel_type.clone(),
                        to: to.clone(),
                    });
                }
            }
        }
        Ok(schema)
    }

    async fn adjacent_relations(&self, node_ids: &[String], limit: usize) -> GraphResult<Vec<Relation>> {
        self.check_available()?;
        self.traversal_calls.fetch_add(1, Ordering::SeqCst);
        let wanted: BTreeSet<&str> = node_ids.iter().map(|s| s.as_str()).collect();
        Ok(self
            .edges
            .iter()
            .filter(|(s, _, t)| wanted.contains(s.as_str()) || wanted.contains(t.as_str()))
            .take(limit)
            .map(|(s, rel_type, t)| Relation {
                source: self.node(s),
                rel_type: rel_type.clone(),
                target: self.node(t),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> InMemoryGraphStore {
        InMemoryGraphStore::new()
            .with_node(GraphNode::new("n1", &["Company"], Some("Acme")))
            .with_node(GraphNode::new("n2", &["Executive"], Some("Jane Doe")))
            .with_node(GraphNode::new("n3", &["Risk"], None))
            .with_edge("n1", "MANAGED_BY", "n2")
            .with_edge("n1", "HAS_RISK", "n3")
    }

    #[tokio::test]
    async fn test_registered_query_matches_normalized_text() {
        let store = store().with_query_result(
            "MATCH (c:Company)\nRETURN c.name",
            TabularResult { columns: vec!["c.name".into()], records: vec![vec![json!("Acme")]] },
        );

        let result = store.execute_structured_query("MATCH (c:Company)   RETURN c.name").await.unwrap();
        assert_eq!(result.len(), 1);
        assert!(store.execute_structured_query("MATCH (n) RETURN n").await.is_err());
        assert_eq!(store.structured_query_count(), 2);
    }

    #[tokio::test]
    async fn test_adjacent_relations_both_directions() {
        let store = store();
        let rels = store.adjacent_relations(&["n2".to_string()], 10).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].render(), "Acme -[MANAGED_BY]-> Jane Doe");

        let limited = store.adjacent_relations(&["n1".to_string()], 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(store.traversal_count(), 2);
    }

    #[tokio::test]
    async fn test_schema_from_contents() {
        let schema = store().schema().await.unwrap();
        assert!(schema.node_properties["Company"].contains("name"));
        assert!(schema.node_properties["Risk"].is_empty());
        assert_eq!(schema.relationships.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_enumeration_recovers() {
        let store = store().failing_enumeration(1);
        assert!(store.schema().await.is_ok());
        assert!(store.query_nodes().await.is_err());
        assert_eq!(store.query_nodes().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = store().unavailable();
        assert!(matches!(store.query_nodes().await, Err(GraphError::ConnectionError(_))));
    }
}
