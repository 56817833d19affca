//! RemoteGraphStore: HTTP client for a running Cypher endpoint
//!
//! Two wire dialects are supported:
//! - Samyama: `POST /api/query` with `{"query": "..."}`, nodes identified by `id(n)`
//! - Neo4j: `POST /db/{database}/tx/commit` (basic auth), nodes identified by `elementId(n)`

use crate::config::{StoreConfig, StoreDialect};
use crate::graph::{
    GraphError, GraphNode, GraphResult, GraphSchema, GraphStore, Relation, RelationshipPattern,
    TabularResult,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::debug;

pub struct RemoteGraphStore {
    http_base_url: String,
    http_client: Client,
    dialect: StoreDialect,
    database: String,
    credentials: Option<(String, String)>,
}

impl RemoteGraphStore {
    pub fn new(config: &StoreConfig) -> GraphResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GraphError::ConnectionError(e.to_string()))?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            http_base_url: config.url.trim_end_matches('/').to_string(),
            http_client,
            dialect: config.dialect,
            database: config.database.clone(),
            credentials,
        })
    }

    fn id_function(&self) -> &'static str {
        match self.dialect {
            StoreDialect::Samyama => "id",
            StoreDialect::Neo4j => "elementId",
        }
    }

    /// Cypher literal for an identifier; Samyama ids are integers
    fn id_literal(&self, id: &str) -> String {
        if self.dialect == StoreDialect::Samyama && id.parse::<u64>().is_ok() {
            return id.to_string();
        }
        format!("'{}'", id.replace('\\', "\\\\").replace('\'', "\\'"))
    }

    async fn post_query(&self, cypher: &str) -> GraphResult<TabularResult> {
        debug!(dialect = ?self.dialect, query = cypher, "executing Cypher");
        match self.dialect {
            StoreDialect::Samyama => self.post_samyama(cypher).await,
            StoreDialect::Neo4j => self.post_neo4j(cypher).await,
        }
    }

    async fn post_samyama(&self, cypher: &str) -> GraphResult<TabularResult> {
        let url = format!("{}/api/query", self.http_base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "query": cypher }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json::<TabularResult>().await?)
        } else {
            let error_body: Value = response
                .json()
                .await
                .unwrap_or_else(|_| json!({"error": "Unknown error"}));
            let msg = error_body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            Err(GraphError::QueryError(msg))
        }
    }

    async fn post_neo4j(&self, cypher: &str) -> GraphResult<TabularResult> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            results: Vec<StatementResult>,
            #[serde(default)]
            errors: Vec<Neo4jError>,
        }

        #[derive(Deserialize)]
        struct StatementResult {
            columns: Vec<String>,
            data: Vec<Row>,
        }

        #[derive(Deserialize)]
        struct Row {
            row: Vec<Value>,
        }

        #[derive(Deserialize)]
        struct Neo4jError {
            code: String,
            message: String,
        }

        let url = format!("{}/db/{}/tx/commit", self.http_base_url, self.database);
        let mut request = self
            .http_client
            .post(&url)
            .json(&json!({ "statements": [{ "statement": cypher }] }));
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(GraphError::ConnectionError(format!(
                "Neo4j returned {}",
                response.status()
            )));
        }

        let body: Response = response.json().await?;
        if let Some(err) = body.errors.first() {
            return Err(GraphError::QueryError(format!("{}: {}", err.code, err.message)));
        }

        let statement = body.results.into_iter().next().ok_or_else(|| {
            GraphError::QueryError("Neo4j returned no statement result".to_string())
        })?;
        Ok(TabularResult {
            columns: statement.columns,
            records: statement.data.into_iter().map(|r| r.row).collect(),
        })
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn value_as_labels(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_as_string).collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Build a node from three consecutive cells: id, labels, name
fn node_from_cells(cells: &[Value]) -> Option<GraphNode> {
    let id = value_as_string(cells.first()?)?;
    Some(GraphNode {
        id,
        labels: cells.get(1).map(value_as_labels).unwrap_or_default(),
        name: cells.get(2).and_then(value_as_string),
    })
}

#[async_trait]
impl GraphStore for RemoteGraphStore {
    async fn query_nodes(&self) -> GraphResult<Vec<GraphNode>> {
        let cypher = format!(
            "MATCH (n) RETURN {}(n) AS id, labels(n) AS labels, n.name AS name",
            self.id_function()
        );
        let result = self.post_query(&cypher).await?;
        Ok(result
            .records
            .iter()
            .filter_map(|row| node_from_cells(row))
            .collect())
    }

    async fn execute_structured_query(&self, query: &str) -> GraphResult<TabularResult> {
        self.post_query(query).await
    }

    async fn schema(&self) -> GraphResult<GraphSchema> {
        let mut schema = GraphSchema::default();

        let labels = self
            .post_query("MATCH (n) UNWIND labels(n) AS label RETURN DISTINCT label")
            .await?;
        for row in &labels.records {
            if let Some(label) = row.first().and_then(value_as_string) {
                schema.node_properties.entry(label).or_default();
            }
        }

        let properties = self
            .post_query("MATCH (n) UNWIND labels(n) AS label UNWIND keys(n) AS key RETURN DISTINCT label, key")
            .await?;
        for row in &properties.records {
            if let (Some(label), Some(key)) = (
                row.first().and_then(value_as_string),
                row.get(1).and_then(value_as_string),
            ) {
                schema.node_properties.entry(label).or_insert_with(BTreeSet::new).insert(key);
            }
        }

        let patterns = self
            .post_query(
                "MATCH (a)-[r]->(b) UNWIND labels(a) AS src UNWIND labels(b) AS dst \
                 RETURN DISTINCT src, type(r) AS rel_type, dst",
            )
            .await?;
        for row in &patterns.records {
            if let (Some(from), Some(rel_type), Some(to)) = (
                row.first().and_then(value_as_string),
                row.get(1).and_then(value_as_string),
                row.get(2).and_then(value_as_string),
            ) {
                schema.relationships.insert(RelationshipPattern { from, rel_type, to });
            }
        }

        Ok(schema)
    }

    async fn adjacent_relations(&self, node_ids: &[String], limit: usize) -> GraphResult<Vec<Relation>> {
        if node_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = node_ids.iter().map(|id| self.id_literal(id)).collect();
        let id_fn = self.id_function();
        let cypher = format!(
            "MATCH (a)-[r]->(b) WHERE {f}(a) IN [{ids}] OR {f}(b) IN [{ids}] \
             RETURN {f}(a) AS a_id, labels(a) AS a_labels, a.name AS a_name, type(r) AS rel_type, \
             {f}(b) AS b_id, labels(b) AS b_labels, b.name AS b_name LIMIT {limit}",
            f = id_fn,
            ids = ids.join(", "),
            limit = limit
        );

        let result = self.post_query(&cypher).await?;
        Ok(result
            .records
            .iter()
            .filter_map(|row| {
                if row.len() < 7 {
                    return None;
                }
                Some(Relation {
                    source: node_from_cells(&row[0..3])?,
                    rel_type: value_as_string(&row[3])?,
                    target: node_from_cells(&row[4..7])?,
                })
            })
            .collect())
    }
}
