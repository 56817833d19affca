//! Entity resolution
//!
//! Rewrites a free-form question into an entity-qualified one and extracts the
//! node identifiers it refers to. The model sees the whole node context
//! snapshot and must answer in a strict two-part format:
//!
//! ```text
//! What are the risks associated with Adani Enterprises Limited?
//! Relevant Node IDs: [4:b16o2424:163, 4:b16o2424:170]
//! ```
//!
//! Output that does not follow the format is still usable: the whole text
//! becomes the question and the identifier list stays empty.

use crate::cache::NodeContextSnapshot;
use crate::error::{with_timeout, RagError, RagResult};
use crate::llm::LanguageModel;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Literal split point between the restated question and the identifiers
pub const NODE_IDS_MARKER: &str = "Relevant Node IDs:";

const QUESTION_LABELS: [&str; 4] = ["answer:", "refined question:", "question:", "output:"];

/// Model output for one question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    /// Entity-qualified restatement of the question
    pub question: String,
    /// Referenced node identifiers, in the order the model listed them
    pub node_ids: Vec<String>,
    /// False when the output lacked the identifier marker
    pub well_formed: bool,
}

impl ResolvedQuery {
    /// Use `question` as-is with no identifiers
    pub fn passthrough(question: &str) -> Self {
        Self {
            question: question.trim().to_string(),
            node_ids: Vec::new(),
            well_formed: true,
        }
    }

    /// Split raw model output on [`NODE_IDS_MARKER`]
    pub fn parse(raw: &str) -> Self {
        match raw.find(NODE_IDS_MARKER) {
            Some(at) => Self {
                question: clean_question(&raw[..at]),
                node_ids: parse_node_ids(&raw[at + NODE_IDS_MARKER.len()..]),
                well_formed: true,
            },
            None => Self {
                question: clean_question(raw),
                node_ids: Vec::new(),
                well_formed: false,
            },
        }
    }
}

fn strip_label(line: &str) -> &str {
    for label in QUESTION_LABELS {
        if let Some(prefix) = line.get(..label.len()) {
            if prefix.eq_ignore_ascii_case(label) {
                return line[label.len()..].trim();
            }
        }
    }
    line
}

/// The restated question, without echoed labels or the original question line
fn clean_question(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    // When the model echoes "Question: ... / Answer: ...", the answer line is the restatement.
    if let Some(answer) = lines
        .iter()
        .rev()
        .find(|l| l.to_lowercase().starts_with("answer:"))
    {
        return strip_label(answer).to_string();
    }

    lines
        .iter()
        .map(|l| strip_label(l))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_node_ids(text: &str) -> Vec<String> {
    let text = text.trim_start();
    let list = match text.strip_prefix('[') {
        Some(inner) => match inner.find(']') {
            Some(end) => &inner[..end],
            None => inner.lines().next().unwrap_or(""),
        },
        None => text.lines().next().unwrap_or(""),
    };

    list.split(',')
        .map(|id| id.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`').trim())
        .filter(|id| !id.is_empty() && *id != "..." && *id != "…")
        .map(|id| id.to_string())
        .collect()
}

/// Grounds questions against the node context snapshot with one model call
pub struct EntityResolver {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl EntityResolver {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build_prompt(question: &str, snapshot: &NodeContextSnapshot) -> String {
        format!(
            r#"You are an expert in identifying entities in a knowledge graph. Your role is to understand the user's question and restate it precisely using the graph node information provided.

<Graph Node Information>
The following are the nodes in the knowledge graph:
{nodes}
Use this information to identify relevant entities for the user's question.
</Graph Node Information>

Given the user's question: "{question}"

Instructions:
- Identify the node names or IDs from the graph that are most relevant to the question.
- Restate the question using the exact entity names found in the node information.
- On the line after the restated question, list the IDs of the nodes involved as:
  {marker} [id1, id2]
- Output nothing other than the restated question and that line.
- The restated question must keep the meaning of the original question. Questions may be broad or specific; do not narrow or broaden them.
- Do not answer the question and do not add information to it. A graph query will be generated from the restated question.

Example:
Question: What are the risks associated with Adani Enterprises?
Output:
What are the risks associated with Adani Enterprises Limited?
{marker} [4:b16o2424-92e8-4379-2895-c43829d35b7a:163]
"#,
            nodes = snapshot.render(),
            question = question.trim(),
            marker = NODE_IDS_MARKER,
        )
    }

    /// Raw model output for `question`; exactly one completion, no retry
    pub async fn resolve_raw(&self, question: &str, snapshot: &NodeContextSnapshot) -> RagResult<String> {
        let prompt = Self::build_prompt(question, snapshot);
        with_timeout("entity resolution", self.timeout, self.model.complete(&prompt)).await
    }

    pub async fn resolve(&self, question: &str, snapshot: &NodeContextSnapshot) -> RagResult<ResolvedQuery> {
        let raw = self.resolve_raw(question, snapshot).await?;
        let mut resolved = ResolvedQuery::parse(&raw);

        if !resolved.well_formed {
            let issue = RagError::ResolutionMalformed(format!("missing '{}'", NODE_IDS_MARKER));
            warn!("{}; using the output as the question with no node ids", issue);
        }
        if resolved.question.is_empty() {
            warn!("resolver returned no question text; keeping the original question");
            resolved.question = question.trim().to_string();
        }

        debug!(question = %resolved.question, ids = ?resolved.node_ids, "resolved question");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;
    use crate::llm::ScriptedModel;

    #[test]
    fn test_parse_exact_template() {
        let resolved = ResolvedQuery::parse("Refined text\nRelevant Node IDs: [id1, id2]");
        assert_eq!(resolved.question, "Refined text");
        assert_eq!(resolved.node_ids, vec!["id1".to_string(), "id2".to_string()]);
        assert!(resolved.well_formed);
    }

    #[test]
    fn test_parse_neo4j_element_ids_and_quotes() {
        let resolved = ResolvedQuery::parse(
            "Who manages Acme Corp?\n\nRelevant Node IDs: [\"4:b16:163\", '4:b16:170', ...]\n",
        );
        assert_eq!(resolved.node_ids, vec!["4:b16:163", "4:b16:170"]);
    }

    #[test]
    fn test_parse_without_brackets() {
        let resolved = ResolvedQuery::parse("Who owns Acme?\nRelevant Node IDs: n1, n2\ntrailing");
        assert_eq!(resolved.node_ids, vec!["n1", "n2"]);
    }

    #[test]
    fn test_parse_strips_echoed_labels() {
        let resolved = ResolvedQuery::parse(
            "Question: Who owns Acme?\nAnswer: Who owns Acme Corporation?\n\nRelevant Node IDs: [n1]",
        );
        assert_eq!(resolved.question, "Who owns Acme Corporation?");

        let labelled = ResolvedQuery::parse("Refined question: What risks does Acme have?\nRelevant Node IDs: []");
        assert_eq!(labelled.question, "What risks does Acme have?");
        assert!(labelled.node_ids.is_empty());
    }

    #[test]
    fn test_parse_missing_marker_degrades() {
        let resolved = ResolvedQuery::parse("Who owns Acme Corporation?");
        assert_eq!(resolved.question, "Who owns Acme Corporation?");
        assert!(resolved.node_ids.is_empty());
        assert!(!resolved.well_formed);
    }

    #[test]
    fn test_prompt_carries_snapshot_and_question() {
        let snapshot = NodeContextSnapshot::from_nodes(&[GraphNode::new("n1", &["Company"], Some("Acme"))]);
        let prompt = EntityResolver::build_prompt("Who owns Acme?", &snapshot);

        assert!(prompt.contains("Node ID: n1, Labels: Company, Name: Acme"));
        assert!(prompt.contains("Given the user's question: \"Who owns Acme?\""));
        assert!(prompt.contains(NODE_IDS_MARKER));
    }

    #[tokio::test]
    async fn test_resolve_issues_one_call() {
        let model = Arc::new(ScriptedModel::new().otherwise("Who owns Acme?\nRelevant Node IDs: [n1]"));
        let resolver = EntityResolver::new(model.clone());
        let snapshot = NodeContextSnapshot::default();

        let resolved = resolver.resolve("Who owns Acme?", &snapshot).await.unwrap();
        assert_eq!(resolved.node_ids, vec!["n1"]);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_output_keeps_original_question() {
        let model = Arc::new(ScriptedModel::new().otherwise("   "));
        let resolver = EntityResolver::new(model);

        let resolved = resolver.resolve("  List all companies ", &NodeContextSnapshot::default()).await.unwrap();
        assert_eq!(resolved.question, "List all companies");
        assert!(!resolved.well_formed);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let model = Arc::new(ScriptedModel::new().fail_on("Graph Node Information", "throttled"));
        let resolver = EntityResolver::new(model);
        assert!(resolver.resolve("q", &NodeContextSnapshot::default()).await.is_err());
    }
}
