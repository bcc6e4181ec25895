//! Concurrent execution of the action dependency graph.
//!
//! Actions with no unexecuted predecessor run immediately; completed
//! actions unblock their dependents. Concurrency is bounded only by
//! dependency edges. A failed action blocks, rather than skips, its
//! dependents; independent branches keep running.

use std::collections::HashSet;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{CambiumError, Result};
use crate::status::{DeployStatus, StatusTracker};

use super::graph::ActionGraph;
use super::plugin::ChangeType;

/// Options for the act phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActOptions {
    /// Mark eligible nodes skipped without invoking any executor.
    pub dry_run: bool,
}

/// Accounting for one act phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Actions whose executor was invoked.
    pub executed: usize,
    /// Executors that returned success.
    pub succeeded: usize,
    /// Executors that returned an error.
    pub failed: usize,
    /// Actions marked skipped in dry-run mode.
    pub skipped: usize,
    /// Actions that never ran because a predecessor failed.
    pub blocked: usize,
}

/// Executes the action graph, driving node statuses through the tracker.
///
/// Every tracked node leaves the initial status here: nodes without a
/// governing action complete trivially at the goal status, the rest
/// follow their action's outcome.
///
/// # Errors
///
/// Returns tracker/store errors, or an internal error if an executor
/// task panicked. Individual action failures are not errors; they are
/// recorded in the summary and in the per-node statuses.
pub async fn execute_graph(
    graph: &ActionGraph,
    tracker: &mut StatusTracker,
    options: ActOptions,
) -> Result<ExecutionSummary> {
    let node_ids: Vec<String> = tracker
        .node_ids()
        .iter()
        .map(ToString::to_string)
        .collect();

    // All nodes must reach at least Waiting before acting begins.
    for node in &node_ids {
        tracker.set(node, DeployStatus::Waiting, None, None).await?;
    }

    let goal_status = tracker.goal().goal_status();

    // Nodes no action governs complete trivially.
    for node in &node_ids {
        if !tracker.wait_info(node)?.acting {
            tracker.set(node, goal_status, None, None).await?;
        }
    }

    let mut summary = ExecutionSummary::default();

    if options.dry_run {
        info!("Dry run: marking {} action(s) skipped", graph.len());
        for idx in 0..graph.len() {
            let action = graph.action(idx);
            if action.change_type == ChangeType::None {
                continue;
            }
            for change in &action.changes {
                tracker
                    .set(
                        &change.element_id,
                        goal_status,
                        None,
                        Some(&action.description),
                    )
                    .await?;
            }
            summary.skipped += 1;
        }
        return Ok(summary);
    }

    let mut pending: Vec<usize> = (0..graph.len())
        .map(|idx| graph.predecessors(idx).len())
        .collect();
    let mut ready: Vec<usize> = pending
        .iter()
        .enumerate()
        .filter_map(|(idx, &count)| (count == 0).then_some(idx))
        .collect();
    let mut started: HashSet<usize> = HashSet::new();
    let mut tasks: JoinSet<(usize, Result<()>)> = JoinSet::new();

    loop {
        while let Some(idx) = ready.pop() {
            started.insert(idx);
            let action = graph.action(idx);

            // Declared no-op: completes without an executor and
            // unblocks dependents immediately.
            if action.change_type == ChangeType::None {
                for &dependent in graph.dependents(idx) {
                    pending[dependent] -= 1;
                    if pending[dependent] == 0 {
                        ready.push(dependent);
                    }
                }
                continue;
            }

            info!(action = %action, "Starting action");
            for change in &action.changes {
                let status = if change.change_type == ChangeType::Delete {
                    DeployStatus::Destroying
                } else {
                    DeployStatus::Deploying
                };
                tracker
                    .set(&change.element_id, status, None, Some(&action.description))
                    .await?;
            }

            let future = action.exec_future();
            tasks.spawn(async move { (idx, future.await) });
            summary.executed += 1;
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        let (idx, result) =
            joined.map_err(|e| CambiumError::internal(format!("action task failed: {e}")))?;
        let action = graph.action(idx);

        match result {
            Ok(()) => {
                summary.succeeded += 1;
                info!(action = %action, "Action complete");
                for change in &action.changes {
                    let status = if change.change_type == ChangeType::Delete {
                        DeployStatus::Destroyed
                    } else {
                        DeployStatus::Deployed
                    };
                    tracker.set(&change.element_id, status, None, None).await?;
                }
                for &dependent in graph.dependents(idx) {
                    pending[dependent] -= 1;
                    if pending[dependent] == 0 {
                        ready.push(dependent);
                    }
                }
            }
            Err(err) => {
                summary.failed += 1;
                error!(action = %action, "Action failed: {err}");
                // Dependents stay blocked; siblings keep running.
                for change in &action.changes {
                    tracker
                        .set(
                            &change.element_id,
                            DeployStatus::Failed,
                            Some(&err.to_string()),
                            None,
                        )
                        .await?;
                }
            }
        }
    }

    summary.blocked = (0..graph.len()).filter(|idx| !started.contains(idx)).count();
    if summary.blocked > 0 {
        warn!(
            "{} action(s) never ran because a predecessor failed",
            summary.blocked
        );
    }

    Ok(summary)
}

impl std::fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} action(s): {} succeeded, {} failed, {} skipped, {} blocked",
            self.executed, self.succeeded, self.failed, self.skipped, self.blocked
        )
    }
}
