//! Node context cache
//!
//! A flattened, one-line-per-node listing of every node identity in the graph.
//! The resolver hands it to the model verbatim so that it can pick real node
//! identifiers instead of inventing them.
//!
//! The file is either absent (fetch and write a fresh copy) or present (use as
//! is). It is never refreshed automatically; a stale file is an accepted risk
//! and deleting it forces a rebuild on the next start.

use crate::error::{with_timeout, RagError, RagResult};
use crate::graph::{GraphNode, GraphStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const ID_PREFIX: &str = "Node ID: ";
const LABELS_SEP: &str = ", Labels: ";
const NAME_SEP: &str = ", Name: ";
const NO_NAME: &str = "N/A";

/// Ordered per-node summary lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeContextSnapshot {
    lines: Vec<String>,
}

fn flatten(s: &str) -> String {
    s.replace(|c: char| c == '\r' || c == '\n', " ")
}

impl NodeContextSnapshot {
    pub fn from_nodes(nodes: &[GraphNode]) -> Self {
        Self {
            lines: nodes.iter().map(Self::format_line).collect(),
        }
    }

    /// Parse persisted text, one node per non-blank line
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.to_string())
                .collect(),
        }
    }

    /// `Node ID: <id>, Labels: <a, b>, Name: <name or N/A>`
    pub fn format_line(node: &GraphNode) -> String {
        let labels: Vec<String> = node.labels.iter().map(|l| flatten(l)).collect();
        let name = match node.name.as_deref() {
            Some(name) if !name.trim().is_empty() => flatten(name),
            _ => NO_NAME.to_string(),
        };
        format!(
            "{}{}{}{}{}{}",
            ID_PREFIX,
            flatten(&node.id),
            LABELS_SEP,
            labels.join(", "),
            NAME_SEP,
            name
        )
    }

    /// Inverse of [`format_line`](Self::format_line); `N/A` reads back as no name
    pub fn parse_line(line: &str) -> Option<GraphNode> {
        let rest = line.trim().strip_prefix(ID_PREFIX)?;
        let labels_at = rest.find(LABELS_SEP)?;
        let id = &rest[..labels_at];
        let rest = &rest[labels_at + LABELS_SEP.len()..];
        let name_at = rest.find(NAME_SEP)?;
        let labels = &rest[..name_at];
        let name = &rest[name_at + NAME_SEP.len()..];

        Some(GraphNode {
            id: id.to_string(),
            labels: labels
                .split(',')
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(|l| l.to_string())
                .collect(),
            name: (name != NO_NAME).then(|| name.to_string()),
        })
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Node identities recovered from the lines; unparseable lines are skipped
    pub fn nodes(&self) -> Vec<GraphNode> {
        self.lines.iter().filter_map(|l| Self::parse_line(l)).collect()
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// File-backed holder of the [`NodeContextSnapshot`]
pub struct NodeContextCache {
    path: PathBuf,
    timeout: Duration,
}

impl NodeContextCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Deadline applied to file I/O and node enumeration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted snapshot; a missing file is `Ok(None)`
    pub async fn load(&self) -> RagResult<Option<NodeContextSnapshot>> {
        let read = tokio::time::timeout(self.timeout, tokio::fs::read_to_string(&self.path)).await;
        match read {
            Ok(Ok(text)) => {
                let snapshot = NodeContextSnapshot::from_text(&text);
                info!("Context loaded from {:?} ({} nodes)", self.path, snapshot.len());
                Ok(Some(snapshot))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No existing context found at {:?}", self.path);
                Ok(None)
            }
            Ok(Err(e)) => Err(RagError::Io(e)),
            Err(_) => Err(RagError::Timeout {
                operation: "reading node context".to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    /// Enumerate every node in `store` into a fresh snapshot
    pub async fn rebuild(&self, store: &dyn GraphStore) -> RagResult<NodeContextSnapshot> {
        let nodes = with_timeout("enumerating graph nodes", self.timeout, store.query_nodes()).await?;
        info!("Fetched {} nodes for the context snapshot", nodes.len());
        Ok(NodeContextSnapshot::from_nodes(&nodes))
    }

    /// Overwrite the file with `snapshot`, never appending
    pub async fn persist(&self, snapshot: &NodeContextSnapshot) -> RagResult<()> {
        let mut text = snapshot.render();
        if !text.is_empty() {
            text.push('\n');
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = async {
            tokio::fs::write(&tmp, text.as_bytes()).await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {
                info!("Context saved to {:?}", self.path);
                Ok(())
            }
            Ok(Err(e)) => Err(RagError::PersistenceFailed(format!("{:?}: {}", self.path, e))),
            Err(_) => Err(RagError::PersistenceFailed(format!("{:?}: write timed out", self.path))),
        }
    }

    /// Load the persisted snapshot, or rebuild and persist it when absent.
    ///
    /// A failed write is logged and the in-memory snapshot is still returned;
    /// the next start fetches again.
    pub async fn load_or_rebuild(&self, store: &dyn GraphStore) -> RagResult<NodeContextSnapshot> {
        if let Some(snapshot) = self.load().await? {
            return Ok(snapshot);
        }

        let snapshot = self
            .rebuild(store)
            .await
            .map_err(|e| RagError::GroundingUnavailable(e.to_string()))?;

        if let Err(e) = self.persist(&snapshot).await {
            warn!("{}; continuing without a persisted cache", e);
        }
        Ok(snapshot)
    }
}

/// Snapshot shared by the pipeline stages.
///
/// Empty until the first successful load; a failed load leaves it empty so the
/// next turn tries again. Once filled it is never replaced.
#[derive(Clone, Default)]
pub struct SnapshotSlot {
    cell: Arc<OnceCell<Arc<NodeContextSnapshot>>>,
}

impl SnapshotSlot {
    /// Slot with nothing loaded yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<NodeContextSnapshot>> {
        self.cell.get().cloned()
    }

    /// The loaded snapshot, loading it through `cache` if the slot is still empty
    pub async fn get_or_load(
        &self,
        cache: &NodeContextCache,
        store: &dyn GraphStore,
    ) -> RagResult<Arc<NodeContextSnapshot>> {
        self.cell
            .get_or_try_init(|| async { cache.load_or_rebuild(store).await.map(Arc::new) })
            .await
            .cloned()
    }
}

impl From<Arc<NodeContextSnapshot>> for SnapshotSlot {
    fn from(snapshot: Arc<NodeContextSnapshot>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new_with(Some(snapshot))),
        }
    }
}

impl From<NodeContextSnapshot> for SnapshotSlot {
    fn from(snapshot: NodeContextSnapshot) -> Self {
        Arc::new(snapshot).into()
    }
}
