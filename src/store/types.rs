//! History entry and status patch types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::{DeployOpStatus, DeployStatus};

/// Phase marker of a history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HistoryStatus {
    /// Committed immediately before acting.
    PreAct,
    /// Terminal: the deployment reached its goal.
    Success,
    /// Terminal: the deployment failed.
    Failed,
    /// A pass changed component state; another pass follows.
    StateChanged,
}

/// One append-only, phase-tagged snapshot of deployment progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Phase marker.
    pub status: HistoryStatus,
    /// Serialized final tree.
    pub tree: Value,
    /// Serialized external-observation cache.
    pub observations: Value,
    /// Serialized action dependency graph.
    pub graph: Value,
    /// Serialized component-local state.
    pub state: Value,
    /// When the entry was committed.
    pub timestamp: DateTime<Utc>,
}

/// Patch updating one deployment step's overall status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepStatusPatch {
    /// The overall operation status.
    pub status: DeployOpStatus,
    /// Optional operator-facing message.
    pub message: Option<String>,
}

/// Patch updating one element's status within a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElementStatusPatch {
    /// Element identity.
    pub element_id: String,
    /// New element status.
    pub status: DeployStatus,
    /// Error message for failed elements.
    pub error: Option<String>,
    /// Optional description of the governing action.
    pub description: Option<String>,
}

impl HistoryStatus {
    /// Returns true for terminal phases.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl HistoryEntry {
    /// Creates an entry with empty payloads.
    #[must_use]
    pub fn new(status: HistoryStatus) -> Self {
        Self {
            status,
            tree: Value::Null,
            observations: Value::Null,
            graph: Value::Null,
            state: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attaches the serialized final tree.
    #[must_use]
    pub fn with_tree(mut self, tree: Value) -> Self {
        self.tree = tree;
        self
    }

    /// Attaches the serialized observation cache.
    #[must_use]
    pub fn with_observations(mut self, observations: Value) -> Self {
        self.observations = observations;
        self
    }

    /// Attaches the serialized dependency graph.
    #[must_use]
    pub fn with_graph(mut self, graph: Value) -> Self {
        self.graph = graph;
        self
    }

    /// Attaches the serialized component state.
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    /// Returns true if both entries carry the same phase and payloads.
    ///
    /// Timestamps are ignored; this backs idempotent re-commits of
    /// unchanged non-terminal entries.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.status == other.status
            && self.tree == other.tree
            && self.observations == other.observations
            && self.graph == other.graph
            && self.state == other.state
    }
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreAct => "preAct",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::StateChanged => "stateChanged",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_classification() {
        assert!(HistoryStatus::Success.is_terminal());
        assert!(HistoryStatus::Failed.is_terminal());
        assert!(!HistoryStatus::PreAct.is_terminal());
        assert!(!HistoryStatus::StateChanged.is_terminal());
    }

    #[test]
    fn test_same_content_ignores_timestamp() {
        let a = HistoryEntry::new(HistoryStatus::PreAct).with_tree(json!({"root": {}}));
        let mut b = a.clone();
        b.timestamp = Utc::now();
        assert!(a.same_content(&b));

        let c = a.clone().with_state(json!({"/root": 1}));
        assert!(!a.same_content(&c));
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&HistoryStatus::StateChanged).unwrap();
        assert_eq!(json, "\"stateChanged\"");
        let json = serde_json::to_string(&HistoryStatus::PreAct).unwrap();
        assert_eq!(json, "\"preAct\"");
    }
}
