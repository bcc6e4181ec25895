//! Deployment status types and per-node tracking.
//!
//! Each deploy node moves through a monotonic state machine toward a
//! goal status; the tracker aggregates counts, drives progress
//! reporting, and persists element-status patches against the current
//! deployment step.

mod tracker;

use serde::{Deserialize, Serialize};

pub use tracker::{NodeSpec, ProgressReporter, StatusCounts, StatusTracker};

/// Direction of a deployment operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeployGoal {
    /// Create or update toward a deployed state.
    Deploy,
    /// Tear down toward a destroyed state.
    Destroy,
}

/// Per-node deployment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    /// Not yet considered by the pass.
    Initial,
    /// Considered; waiting for its action (or trivially complete).
    Waiting,
    /// An action is deploying this node.
    Deploying,
    /// An action is destroying this node.
    Destroying,
    /// Goal-terminal: the node is deployed.
    Deployed,
    /// Goal-terminal: the node is destroyed.
    Destroyed,
    /// Terminal, non-recoverable failure.
    Failed,
}

/// Overall status of one deployment operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeployOpStatus {
    /// Actions are still in flight.
    Deploying,
    /// Teardown actions are still in flight.
    Destroying,
    /// Every node reached its goal.
    Deployed,
    /// Every node was destroyed.
    Destroyed,
    /// A pass changed component state; a rebuild is required.
    StateChanged,
    /// At least one node failed.
    Failed,
}

/// Whether an action governs a node and how its completion behaves.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitInfo {
    /// An active action governs this node.
    pub acting: bool,
    /// Completion is a no-op (nothing to do, or trivial when deployed).
    pub trivial: bool,
}

impl DeployGoal {
    /// The terminal status nodes must reach for this direction.
    #[must_use]
    pub const fn goal_status(self) -> DeployStatus {
        match self {
            Self::Deploy => DeployStatus::Deployed,
            Self::Destroy => DeployStatus::Destroyed,
        }
    }

    /// The in-progress status for this direction.
    #[must_use]
    pub const fn active_status(self) -> DeployStatus {
        match self {
            Self::Deploy => DeployStatus::Deploying,
            Self::Destroy => DeployStatus::Destroying,
        }
    }

    /// The in-progress variant of the overall operation status.
    #[must_use]
    pub const fn active_op_status(self) -> DeployOpStatus {
        match self {
            Self::Deploy => DeployOpStatus::Deploying,
            Self::Destroy => DeployOpStatus::Destroying,
        }
    }

    /// The overall operation status when every node reached its goal.
    #[must_use]
    pub const fn goal_op_status(self) -> DeployOpStatus {
        match self {
            Self::Deploy => DeployOpStatus::Deployed,
            Self::Destroy => DeployOpStatus::Destroyed,
        }
    }
}

impl DeployStatus {
    /// Returns true for terminal statuses (goal-terminal or failed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Destroyed | Self::Failed)
    }

    /// Returns true while an action is in flight for the node.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Deploying | Self::Destroying)
    }

    /// Returns true for goal-terminal statuses.
    #[must_use]
    pub const fn is_goal(self) -> bool {
        matches!(self, Self::Deployed | Self::Destroyed)
    }
}

impl std::fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Waiting => "waiting",
            Self::Deploying => "deploying",
            Self::Destroying => "destroying",
            Self::Deployed => "deployed",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DeployOpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deploying => "deploying",
            Self::Destroying => "destroying",
            Self::Deployed => "deployed",
            Self::Destroyed => "destroyed",
            Self::StateChanged => "state changed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DeployGoal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deploy => "deploy",
            Self::Destroy => "destroy",
        };
        write!(f, "{s}")
    }
}
