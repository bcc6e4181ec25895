//! Per-node status tracking with aggregate counters and persistence.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, StatusError};
use crate::store::{DeploymentStore, ElementStatusPatch, StepStatusPatch};

use super::{DeployGoal, DeployOpStatus, DeployStatus, WaitInfo};

/// One node handed to the tracker at construction.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Element identity (or synthetic node name).
    pub id: String,
    /// Whether the node carries a primitive element.
    pub primitive: bool,
    /// Action/trivial descriptor for the node.
    pub wait: WaitInfo,
}

/// Best-effort task progress sink.
///
/// Trivial nodes are excluded from progress reporting; they still
/// participate in status counting.
pub trait ProgressReporter: Send + Sync {
    /// An action started working on the node.
    fn started(&self, node: &str, description: &str);
    /// The node reached its goal status.
    fn completed(&self, node: &str);
    /// The node failed.
    fn failed(&self, node: &str, message: &str);
    /// The node was skipped (dry run).
    fn skipped(&self, node: &str);
}

/// Aggregate node counts, bucketed per status.
#[derive(Debug, Clone, Default)]
pub struct StatusCounts {
    total: HashMap<DeployStatus, usize>,
    primitive: HashMap<DeployStatus, usize>,
}

struct NodeEntry {
    status: DeployStatus,
    primitive: bool,
    wait: WaitInfo,
    error: Option<String>,
}

/// Tracks every deploy node's status through one deployment step.
pub struct StatusTracker {
    goal: DeployGoal,
    dry_run: bool,
    step_id: String,
    store: Arc<dyn DeploymentStore>,
    progress: Option<Arc<dyn ProgressReporter>>,
    nodes: HashMap<String, NodeEntry>,
    counts: StatusCounts,
}

impl StatusCounts {
    /// Returns the number of nodes at the given status.
    #[must_use]
    pub fn of(&self, status: DeployStatus) -> usize {
        self.total.get(&status).copied().unwrap_or(0)
    }

    /// Returns the number of primitive-element nodes at the status.
    #[must_use]
    pub fn primitive_of(&self, status: DeployStatus) -> usize {
        self.primitive.get(&status).copied().unwrap_or(0)
    }

    /// Returns the total node count.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.values().sum()
    }

    fn add(&mut self, status: DeployStatus, primitive: bool) {
        *self.total.entry(status).or_insert(0) += 1;
        if primitive {
            *self.primitive.entry(status).or_insert(0) += 1;
        }
    }

    fn transition(&mut self, from: DeployStatus, to: DeployStatus, primitive: bool) {
        if let Some(count) = self.total.get_mut(&from) {
            *count = count.saturating_sub(1);
        }
        if primitive && let Some(count) = self.primitive.get_mut(&from) {
            *count = count.saturating_sub(1);
        }
        self.add(to, primitive);
    }
}

impl StatusTracker {
    /// Creates a tracker with every node in the initial status.
    #[must_use]
    pub fn new(
        goal: DeployGoal,
        nodes: Vec<NodeSpec>,
        step_id: impl Into<String>,
        store: Arc<dyn DeploymentStore>,
    ) -> Self {
        let mut counts = StatusCounts::default();
        let entries = nodes
            .into_iter()
            .map(|spec| {
                counts.add(DeployStatus::Initial, spec.primitive);
                (
                    spec.id,
                    NodeEntry {
                        status: DeployStatus::Initial,
                        primitive: spec.primitive,
                        wait: spec.wait,
                        error: None,
                    },
                )
            })
            .collect();
        Self {
            goal,
            dry_run: false,
            step_id: step_id.into(),
            store,
            progress: None,
            nodes: entries,
            counts,
        }
    }

    /// Disables persistence side effects and reports skips instead of
    /// completions.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Attaches a progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Returns the deployment goal.
    #[must_use]
    pub const fn goal(&self) -> DeployGoal {
        self.goal
    }

    /// Returns true when running dry.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns the aggregate counters.
    #[must_use]
    pub const fn counts(&self) -> &StatusCounts {
        &self.counts
    }

    /// Returns the tracked node ids.
    #[must_use]
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    /// Returns a node's current status.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownNode`] for untracked nodes.
    pub fn get(&self, node: &str) -> Result<DeployStatus> {
        self.entry(node).map(|e| e.status)
    }

    /// Returns a node's wait descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownNode`] for untracked nodes.
    pub fn wait_info(&self, node: &str) -> Result<WaitInfo> {
        self.entry(node).map(|e| e.wait)
    }

    /// Returns true if the node is in a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownNode`] for untracked nodes.
    pub fn is_final(&self, node: &str) -> Result<bool> {
        self.entry(node).map(|e| e.status.is_terminal())
    }

    /// Returns true if an action is in flight for the node.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownNode`] for untracked nodes.
    pub fn is_active(&self, node: &str) -> Result<bool> {
        self.entry(node).map(|e| e.status.is_active())
    }

    /// Returns the error recorded for a node, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownNode`] for untracked nodes.
    pub fn node_error(&self, node: &str) -> Result<Option<String>> {
        self.entry(node).map(|e| e.error.clone())
    }

    /// Moves a node to a new status.
    ///
    /// Returns `false` without side effects when the node is already
    /// terminal or already at the requested status. Otherwise updates
    /// the counters and progress reporting and, outside dry runs,
    /// persists an element-status patch for the current step.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownNode`] for untracked nodes, or the
    /// store's error if persisting the patch fails.
    pub async fn set(
        &mut self,
        node: &str,
        status: DeployStatus,
        error: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| StatusError::UnknownNode {
                node: node.to_string(),
            })?;

        if entry.status.is_terminal() || entry.status == status {
            return Ok(false);
        }

        let previous = entry.status;
        entry.status = status;
        entry.error = error.map(String::from);
        self.counts.transition(previous, status, entry.primitive);

        debug!(node, %previous, %status, "Node status changed");

        if let Some(progress) = &self.progress
            && !entry.wait.trivial
        {
            if status.is_active() {
                progress.started(node, description.unwrap_or("working"));
            } else if status.is_goal() {
                if self.dry_run {
                    progress.skipped(node);
                } else {
                    progress.completed(node);
                }
            } else if status == DeployStatus::Failed {
                progress.failed(node, error.unwrap_or("action failed"));
            }
        }

        if !self.dry_run {
            let patch = ElementStatusPatch {
                element_id: node.to_string(),
                status,
                error: error.map(String::from),
                description: description.map(String::from),
            };
            self.store.element_status(&self.step_id, patch).await?;
        }

        Ok(true)
    }

    /// Computes and persists the overall deployment status.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::NodeStillInitial`] — an engine bug, not a
    /// user error — if any node never left the initial status, or the
    /// store's error if persisting the step status fails.
    pub async fn complete(&mut self, state_changed: bool) -> Result<DeployOpStatus> {
        if self.counts.of(DeployStatus::Initial) > 0 {
            let node = self
                .nodes
                .iter()
                .find(|(_, e)| e.status == DeployStatus::Initial)
                .map(|(id, _)| id.clone())
                .unwrap_or_default();
            return Err(StatusError::NodeStillInitial { node }.into());
        }

        let failed = self.counts.of(DeployStatus::Failed);
        let at_goal = self.counts.of(DeployStatus::Deployed)
            + self.counts.of(DeployStatus::Destroyed);

        let status = if failed > 0 {
            DeployOpStatus::Failed
        } else if at_goal == self.counts.total() {
            self.goal.goal_op_status()
        } else if state_changed {
            DeployOpStatus::StateChanged
        } else {
            self.goal.active_op_status()
        };

        if failed > 0 {
            warn!("Deployment step finished with {failed} failed node(s)");
        }

        if !self.dry_run {
            let patch = StepStatusPatch {
                status,
                message: None,
            };
            self.store.status(&self.step_id, patch).await?;
        }

        Ok(status)
    }

    fn entry(&self, node: &str) -> Result<&NodeEntry> {
        self.nodes.get(node).ok_or_else(|| {
            StatusError::UnknownNode {
                node: node.to_string(),
            }
            .into()
        })
    }
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("goal", &self.goal)
            .field("dry_run", &self.dry_run)
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    fn specs() -> Vec<NodeSpec> {
        vec![
            NodeSpec {
                id: String::from("/root/web"),
                primitive: true,
                wait: WaitInfo {
                    acting: true,
                    trivial: false,
                },
            },
            NodeSpec {
                id: String::from("/root/db"),
                primitive: true,
                wait: WaitInfo {
                    acting: true,
                    trivial: false,
                },
            },
            NodeSpec {
                id: String::from("/root"),
                primitive: false,
                wait: WaitInfo {
                    acting: false,
                    trivial: true,
                },
            },
        ]
    }

    fn tracker(goal: DeployGoal) -> StatusTracker {
        StatusTracker::new(goal, specs(), "step-1", Arc::new(MemoryStore::new()))
    }

    #[derive(Default)]
    struct SpyProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for SpyProgress {
        fn started(&self, node: &str, _description: &str) {
            self.events.lock().unwrap().push(format!("started {node}"));
        }
        fn completed(&self, node: &str) {
            self.events.lock().unwrap().push(format!("completed {node}"));
        }
        fn failed(&self, node: &str, _message: &str) {
            self.events.lock().unwrap().push(format!("failed {node}"));
        }
        fn skipped(&self, node: &str) {
            self.events.lock().unwrap().push(format!("skipped {node}"));
        }
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let mut tracker = tracker(DeployGoal::Deploy);
        assert!(tracker.set("/root/web", DeployStatus::Waiting, None, None).await.unwrap());
        assert!(tracker.set("/root/web", DeployStatus::Failed, Some("boom"), None).await.unwrap());

        // Terminal: every further transition is a no-op returning false.
        assert!(!tracker.set("/root/web", DeployStatus::Deployed, None, None).await.unwrap());
        assert!(!tracker.set("/root/web", DeployStatus::Waiting, None, None).await.unwrap());
        assert_eq!(tracker.get("/root/web").unwrap(), DeployStatus::Failed);
        assert!(tracker.is_final("/root/web").unwrap());
        assert!(!tracker.is_active("/root/web").unwrap());
        assert_eq!(
            tracker.node_error("/root/web").unwrap().as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn test_same_status_is_noop() {
        let mut tracker = tracker(DeployGoal::Deploy);
        assert!(tracker.set("/root/web", DeployStatus::Waiting, None, None).await.unwrap());
        assert!(!tracker.set("/root/web", DeployStatus::Waiting, None, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_counts_follow_transitions() {
        let mut tracker = tracker(DeployGoal::Deploy);
        for node in ["/root/web", "/root/db", "/root"] {
            tracker.set(node, DeployStatus::Waiting, None, None).await.unwrap();
        }
        tracker.set("/root/web", DeployStatus::Deploying, None, None).await.unwrap();

        assert_eq!(tracker.counts().of(DeployStatus::Initial), 0);
        assert_eq!(tracker.counts().of(DeployStatus::Waiting), 2);
        assert_eq!(tracker.counts().of(DeployStatus::Deploying), 1);
        assert_eq!(tracker.counts().primitive_of(DeployStatus::Deploying), 1);
        assert_eq!(tracker.counts().total(), 3);
    }

    #[tokio::test]
    async fn test_complete_rejects_initial_nodes() {
        let mut tracker = tracker(DeployGoal::Deploy);
        let err = tracker.complete(false).await.unwrap_err();
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn test_complete_rollup() {
        let mut tracker = tracker(DeployGoal::Deploy);
        for node in ["/root/web", "/root/db", "/root"] {
            tracker.set(node, DeployStatus::Waiting, None, None).await.unwrap();
        }

        // Incomplete, no state change: in-progress variant.
        assert_eq!(
            tracker.complete(false).await.unwrap(),
            DeployOpStatus::Deploying
        );

        // Incomplete but state changed.
        assert_eq!(
            tracker.complete(true).await.unwrap(),
            DeployOpStatus::StateChanged
        );

        for node in ["/root/web", "/root/db", "/root"] {
            tracker.set(node, DeployStatus::Deployed, None, None).await.unwrap();
        }
        assert_eq!(
            tracker.complete(false).await.unwrap(),
            DeployOpStatus::Deployed
        );
    }

    #[tokio::test]
    async fn test_complete_failed_wins() {
        let mut tracker = tracker(DeployGoal::Deploy);
        for node in ["/root/web", "/root/db", "/root"] {
            tracker.set(node, DeployStatus::Waiting, None, None).await.unwrap();
        }
        tracker.set("/root/db", DeployStatus::Failed, Some("boom"), None).await.unwrap();
        assert_eq!(
            tracker.complete(true).await.unwrap(),
            DeployOpStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_dry_run_skips_persistence_and_reports_skipped() {
        let store = Arc::new(MemoryStore::new());
        let progress = Arc::new(SpyProgress::default());
        let mut tracker = StatusTracker::new(
            DeployGoal::Deploy,
            specs(),
            "step-1",
            Arc::clone(&store) as Arc<dyn DeploymentStore>,
        )
        .with_dry_run(true)
        .with_progress(Arc::clone(&progress) as Arc<dyn ProgressReporter>);

        tracker.set("/root/web", DeployStatus::Waiting, None, None).await.unwrap();
        tracker.set("/root/web", DeployStatus::Deployed, None, None).await.unwrap();

        assert!(store.element_patches().is_empty());
        assert!(store.status_patches().is_empty());
        assert!(
            progress
                .events
                .lock()
                .unwrap()
                .contains(&String::from("skipped /root/web"))
        );
    }

    #[tokio::test]
    async fn test_trivial_nodes_excluded_from_progress() {
        let progress = Arc::new(SpyProgress::default());
        let mut tracker = StatusTracker::new(
            DeployGoal::Deploy,
            specs(),
            "step-1",
            Arc::new(MemoryStore::new()),
        )
        .with_progress(Arc::clone(&progress) as Arc<dyn ProgressReporter>);

        tracker.set("/root", DeployStatus::Waiting, None, None).await.unwrap();
        tracker.set("/root", DeployStatus::Deployed, None, None).await.unwrap();
        assert!(progress.events.lock().unwrap().is_empty());

        // Counted even though unreported.
        assert_eq!(tracker.counts().of(DeployStatus::Deployed), 1);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let tracker = tracker(DeployGoal::Destroy);
        assert!(tracker.get("/missing").is_err());
    }
}
