//! Error types for the cambium deployment engine.
//!
//! This module provides a comprehensive error hierarchy for all operations
//! in the engine lifecycle: selector parsing, tree building, deployment
//! orchestration, status tracking, and history persistence.

use std::collections::HashMap;
use thiserror::Error;

/// The main error type for the cambium engine.
#[derive(Debug, Error)]
pub enum CambiumError {
    /// Style sheet and selector errors.
    #[error("Style error: {0}")]
    Style(#[from] StyleError),

    /// Build engine errors.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Deployment orchestration errors.
    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    /// Status tracking errors.
    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    /// History store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Environment observation errors.
    #[error("Observation error: {0}")]
    Observe(#[from] ObserveError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Style sheet and selector errors.
#[derive(Debug, Error)]
pub enum StyleError {
    /// The selector text is malformed.
    #[error("Selector syntax error at offset {position}: {message}")]
    Syntax {
        /// Description of the parse error.
        message: String,
        /// Byte offset into the selector text.
        position: usize,
    },

    /// The selector uses syntax the matcher does not implement.
    #[error("Unsupported selector syntax: {syntax}")]
    UnsupportedSelector {
        /// The offending selector fragment.
        syntax: String,
    },

    /// A tag name in the selector is not bound in the type scope.
    #[error("Unknown component type in selector: {name}")]
    UnknownTag {
        /// The unbound tag name.
        name: String,
    },
}

/// Build engine errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build loop did not reach a fixed point within the iteration cap.
    #[error("Build did not terminate after {iterations} passes")]
    NonTerminating {
        /// Number of passes attempted.
        iterations: u32,
    },

    /// One or more components failed to build in deploy mode.
    #[error("Build completed partially with {} error(s): {}", errors.len(), errors.join("; "))]
    PartialBuild {
        /// Collected per-component error messages.
        errors: Vec<String>,
    },

    /// A single component's build function failed.
    #[error("Component '{component}' failed to build: {message}")]
    ComponentBuild {
        /// Display name of the failing component type.
        component: String,
        /// Description of the failure.
        message: String,
    },

    /// The serialized tree could not be reanimated.
    #[error("Failed to reanimate tree: {message}")]
    Reanimate {
        /// Description of the reanimation failure.
        message: String,
    },
}

/// Deployment orchestration errors.
#[derive(Debug, Error)]
pub enum DeployError {
    /// An orchestrator operation was called out of phase order.
    #[error("Illegal operation sequence: attempted {attempted} while in {current}, requires {required}")]
    IllegalSequence {
        /// The operation that was attempted.
        attempted: String,
        /// The phase the orchestrator was in.
        current: String,
        /// The phase the operation requires.
        required: String,
    },

    /// Two differing plugins were registered under the same package and name.
    #[error("Conflicting plugin registration: {package}/{name}")]
    PluginConflict {
        /// Package identity of the plugin.
        package: String,
        /// Plugin name within the package.
        name: String,
    },

    /// The deploy pass made no progress and did not complete.
    #[error("Deployment did not converge: pass was neither complete nor state-changed")]
    NotConverged,

    /// The action dependency graph references an unknown node.
    #[error("Action dependency references unknown element: {element_id}")]
    UnknownDependency {
        /// The unresolved element identity.
        element_id: String,
    },

    /// The action dependency graph contains a cycle.
    #[error("Action dependency cycle involving: {elements}")]
    DependencyCycle {
        /// Elements participating in the cycle.
        elements: String,
    },
}

/// Status tracking errors.
#[derive(Debug, Error)]
pub enum StatusError {
    /// A node was still in the initial status when the pass completed.
    #[error("Node '{node}' still in initial status at completion")]
    NodeStillInitial {
        /// Identity of the offending node.
        node: String,
    },

    /// A status was requested for a node the tracker does not know.
    #[error("Unknown deploy node: {node}")]
    UnknownNode {
        /// Identity of the unknown node.
        node: String,
    },
}

/// History store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The same terminal phase was committed twice in a row.
    #[error("Repeated terminal history commit: {status}")]
    RepeatedTerminalCommit {
        /// The terminal status that was repeated.
        status: String,
    },

    /// Serialization of a history payload failed.
    #[error("History serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The requested history entry does not exist.
    #[error("No history entry found{}", filter.as_deref().map(|f| format!(" for status {f}")).unwrap_or_default())]
    EntryNotFound {
        /// Optional status filter that was applied.
        filter: Option<String>,
    },

    /// The deployment data directory is unavailable.
    #[error("Deployment data directory unavailable: {message}")]
    DataDirUnavailable {
        /// Description of the failure.
        message: String,
    },
}

/// Environment observation errors.
#[derive(Debug, Error)]
pub enum ObserveError {
    /// Two observers were registered under the same name.
    #[error("Duplicate observer registration: {name}")]
    DuplicateObserver {
        /// The duplicated observer name.
        name: String,
    },

    /// One or more observers failed; successful results are attached.
    #[error("{} observer(s) failed: {}", failures.len(), failures.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", "))]
    Aggregate {
        /// Per-observer failure descriptions.
        failures: Vec<ObserverFailure>,
        /// Observations from the observers that succeeded.
        partial: HashMap<String, serde_json::Value>,
    },
}

/// A single observer failure within an aggregate observation error.
#[derive(Debug, Clone)]
pub struct ObserverFailure {
    /// Name the observer or plugin was registered under.
    pub name: String,
    /// Description of the failure.
    pub message: String,
}

/// Result type alias for cambium operations.
pub type Result<T> = std::result::Result<T, CambiumError>;

impl CambiumError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error signals an engine bug rather than a
    /// user or environment error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Internal(_)
                | Self::Status(StatusError::NodeStillInitial { .. })
                | Self::Store(StoreError::RepeatedTerminalCommit { .. })
        )
    }

    /// Returns true if the error may be tolerated in preview contexts.
    #[must_use]
    pub const fn is_partial_build(&self) -> bool {
        matches!(self, Self::Build(BuildError::PartialBuild { .. }))
    }
}

impl StyleError {
    /// Creates a syntax error at the given offset.
    #[must_use]
    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            position,
        }
    }

    /// Creates an unsupported-selector error naming the offending syntax.
    #[must_use]
    pub fn unsupported(syntax: impl Into<String>) -> Self {
        Self::UnsupportedSelector {
            syntax: syntax.into(),
        }
    }
}

impl BuildError {
    /// Creates a component build failure.
    #[must_use]
    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ComponentBuild {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Creates a reanimation failure.
    #[must_use]
    pub fn reanimate(message: impl Into<String>) -> Self {
        Self::Reanimate {
            message: message.into(),
        }
    }
}

impl DeployError {
    /// Creates an illegal-sequence error for an out-of-phase operation.
    #[must_use]
    pub fn illegal_sequence(
        attempted: impl Into<String>,
        current: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Self::IllegalSequence {
            attempted: attempted.into(),
            current: current.into(),
            required: required.into(),
        }
    }
}

impl StoreError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_classification() {
        let err = CambiumError::Status(StatusError::NodeStillInitial {
            node: String::from("web"),
        });
        assert!(err.is_internal());

        let err = CambiumError::Style(StyleError::unsupported(":hover"));
        assert!(!err.is_internal());
    }

    #[test]
    fn test_syntax_error_display() {
        let err = StyleError::syntax("unexpected token", 4);
        assert_eq!(
            err.to_string(),
            "Selector syntax error at offset 4: unexpected token"
        );
    }
}
