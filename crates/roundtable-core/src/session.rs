use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task the graph runtime will execute next: a node name, plus the
/// isolated sub-state when the task is a fan-out branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTask {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Map<String, serde_json::Value>>,
}

impl PendingTask {
    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            input: None,
        }
    }

    pub fn branch(node: impl Into<String>, input: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            node: node.into(),
            input: Some(input),
        }
    }

    pub fn is_branch(&self) -> bool {
        self.input.is_some()
    }
}

/// A fan-out branch that failed and was excluded from its join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchFailure {
    /// Branch label, `node#index`.
    pub branch: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted position and state of one workflow session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// Serialized workflow state.
    pub state: serde_json::Map<String, serde_json::Value>,
    /// Node the run is paused before, if any.
    pub paused_at: Option<String>,
    /// Tasks that will run on resume.
    pub next: Vec<PendingTask>,
    pub pending_interrupt: bool,
    #[serde(default)]
    pub failures: Vec<BranchFailure>,
    /// Monotonic write counter used for optimistic conflict detection.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: serde_json::Map::new(),
            paused_at: None,
            next: vec![],
            pending_interrupt: false,
            failures: vec![],
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether the run has reached END.
    pub fn is_complete(&self) -> bool {
        self.next.is_empty() && !self.pending_interrupt
    }
}
