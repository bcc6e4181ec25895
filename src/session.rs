//! The outer build-and-deploy loop.
//!
//! A session builds the specification to its final tree, reanimates the
//! previously deployed tree from history, drives plugins through
//! observe→analyze→act, and repeats while acting keeps changing
//! component state. History entries are committed at every phase
//! boundary so a failed deployment remains inspectable and resumable.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use crate::build::{BuildEngine, BuildOptions, ComponentStateStore, FinalTree};
use crate::deploy::{ActOptions, PluginManager, PluginRegistry, StartOptions};
use crate::element::Element;
use crate::error::{CambiumError, DeployError, ObserveError, Result};
use crate::message::{Message, MessageLog, MessageSummary};
use crate::observe::{ObservationMap, ObserverRegistry};
use crate::status::{DeployGoal, DeployOpStatus, ProgressReporter, StatusCounts, StatusTracker};
use crate::store::{CommitGuard, DeploymentStore, HistoryEntry, HistoryStatus};
use crate::style::{StyleSheet, TypeScope};

/// Outcome of one deployment session.
#[derive(Debug)]
pub struct DeployResult {
    /// Final overall status.
    pub status: DeployOpStatus,
    /// Operator-facing messages collected across the session.
    pub messages: Vec<Message>,
    /// Message counts by severity.
    pub summary: MessageSummary,
    /// Node counts from the last act pass.
    pub counts: StatusCounts,
    /// Number of build→observe→act passes the session took.
    pub passes: u32,
}

/// One deployment session over a specification tree.
pub struct DeploySession {
    store: Arc<dyn DeploymentStore>,
    plugins: PluginRegistry,
    observers: ObserverRegistry,
    reanimate_scope: TypeScope,
    goal: DeployGoal,
    dry_run: bool,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl DeploySession {
    /// Creates a session with injected registries and store.
    #[must_use]
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        plugins: PluginRegistry,
        observers: ObserverRegistry,
        reanimate_scope: TypeScope,
    ) -> Self {
        Self {
            store,
            plugins,
            observers,
            reanimate_scope,
            goal: DeployGoal::Deploy,
            dry_run: false,
            progress: None,
        }
    }

    /// Sets the deployment direction.
    #[must_use]
    pub const fn with_goal(mut self, goal: DeployGoal) -> Self {
        self.goal = goal;
        self
    }

    /// Enables dry-run mode: no executors run and nothing persists.
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

    /// Runs the session to completion.
    ///
    /// Deployment failures (failed actions) are reported through the
    /// returned [`DeployResult`], not as errors; hard errors (build
    /// failures, phase violations, engine bugs) propagate. Cleanup —
    /// plugin `finish` and data-directory release — runs on every exit
    /// path.
    ///
    /// # Errors
    ///
    /// Returns build, orchestration, or store errors.
    pub async fn run(&self, root: &Element, sheet: &StyleSheet) -> Result<DeployResult> {
        let mut log = MessageLog::new();
        let mut manager = PluginManager::new(&self.plugins);

        let outcome = self.drive(&mut manager, root, sheet, &mut log).await;

        if let Err(err) = manager.finish().await
            && !matches!(err, CambiumError::Deploy(DeployError::IllegalSequence { .. }))
        {
            log.push(Message::warning(format!("Plugin cleanup failed: {err}")));
        }
        if let Err(err) = self.store.release_data_dir().await {
            log.push(Message::warning(format!(
                "Failed to release data directory: {err}"
            )));
        }

        match outcome {
            Ok((status, counts, passes)) => {
                let summary = log.summary();
                Ok(DeployResult {
                    status,
                    messages: log.into_messages(),
                    summary,
                    counts,
                    passes,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn drive(
        &self,
        manager: &mut PluginManager,
        root: &Element,
        sheet: &StyleSheet,
        log: &mut MessageLog,
    ) -> Result<(DeployOpStatus, StatusCounts, u32)> {
        let op_id = self.store.new_op_id().await?;
        let data_dir = self
            .store
            .data_dir(Some(HistoryStatus::Success))
            .await?;
        let guard = CommitGuard::new(Arc::clone(&self.store));

        // Resume: previous tree and component state come from history.
        let last = self.store.last_entry(None).await?;
        let (mut old_tree, state) = match last {
            Some(entry) => {
                let state = serde_json::from_value(entry.state.clone())
                    .map(ComponentStateStore::from_snapshot)
                    .unwrap_or_default();
                let old = if entry.tree.is_null() {
                    None
                } else {
                    Some(self.reanimate_previous(entry.tree.clone(), &state)?)
                };
                (old, state)
            }
            None => (None, ComponentStateStore::new()),
        };
        let engine = BuildEngine::with_state(state);

        info!(
            deploy_id = %op_id,
            goal = %self.goal,
            dry_run = self.dry_run,
            "Starting deployment"
        );

        manager
            .start(StartOptions {
                deploy_id: op_id.clone(),
                goal: self.goal,
                data_dir,
                state: engine.state().clone(),
            })
            .await?;

        let mut passes = 0u32;
        loop {
            passes += 1;
            let step_id = self.store.new_step_id(&op_id).await?;

            let new_tree = self.build_deploy_tree(&engine, root, sheet, log).await?;

            let observations = match manager.observe(old_tree.as_ref(), &new_tree).await {
                Ok(observations) => observations,
                Err(CambiumError::Observe(ObserveError::Aggregate { failures, partial })) => {
                    for failure in failures {
                        log.push(Message::warning(format!(
                            "Plugin {} failed to observe: {}",
                            failure.name, failure.message
                        )));
                    }
                    partial
                }
                Err(err) => return Err(err),
            };

            let (graph_json, node_specs) = {
                let graph = manager.analyze(old_tree.as_ref(), &new_tree, &observations)?;
                (graph.to_json(), graph.node_specs(&new_tree))
            };

            let mut tracker = StatusTracker::new(
                self.goal,
                node_specs,
                &step_id,
                Arc::clone(&self.store),
            )
            .with_dry_run(self.dry_run);
            if let Some(progress) = &self.progress {
                tracker = tracker.with_progress(Arc::clone(progress));
            }

            let entry_payloads = |status: HistoryStatus| -> Result<HistoryEntry> {
                Ok(HistoryEntry::new(status)
                    .with_tree(new_tree.to_json()?)
                    .with_observations(json!(observations))
                    .with_graph(graph_json.clone())
                    .with_state(json!(engine.state().snapshot())))
            };

            if !self.dry_run {
                guard.commit(entry_payloads(HistoryStatus::PreAct)?).await?;
            }

            let act = manager
                .act(
                    &mut tracker,
                    ActOptions {
                        dry_run: self.dry_run,
                    },
                    engine.state(),
                )
                .await?;

            if act.summary.failed > 0 {
                log.push(Message::error(format!(
                    "{} action(s) failed, {} blocked",
                    act.summary.failed, act.summary.blocked
                )));
            }

            let status = tracker.complete(act.state_changed).await?;
            let counts = tracker.counts().clone();

            if status == DeployOpStatus::Failed {
                error!("Deployment failed after {passes} pass(es)");
                if !self.dry_run {
                    guard.commit(entry_payloads(HistoryStatus::Failed)?).await?;
                }
                return Ok((status, counts, passes));
            }

            // Any state change means the tree may rebuild differently;
            // another pass runs even if every node reached its goal.
            if act.state_changed {
                info!("Component state changed; rebuilding");
                log.push(Message::info(format!(
                    "Pass {passes} changed component state; rebuilding"
                )));
                if !self.dry_run {
                    guard
                        .commit(entry_payloads(HistoryStatus::StateChanged)?)
                        .await?;
                }
                old_tree = Some(new_tree);
                continue;
            }

            if status == self.goal.goal_op_status() {
                info!("Deployment complete after {passes} pass(es)");
                log.push(Message::info(format!(
                    "Deployment {status} after {passes} pass(es)"
                )));
                if !self.dry_run {
                    guard
                        .commit(entry_payloads(HistoryStatus::Success)?)
                        .await?;
                }
                return Ok((status, counts, passes));
            }

            // Neither complete nor state-changed: deliberately fatal
            // pending a defined retry policy.
            error!("Deployment made no progress in pass {passes}");
            if !self.dry_run {
                let _ = guard.commit(entry_payloads(HistoryStatus::Failed)?).await;
            }
            return Err(DeployError::NotConverged.into());
        }
    }

    /// Builds the specification in deploy mode, fulfilling observer
    /// queries through one observation round when the cache is cold.
    async fn build_deploy_tree(
        &self,
        engine: &BuildEngine,
        root: &Element,
        sheet: &StyleSheet,
        log: &mut MessageLog,
    ) -> Result<FinalTree> {
        let mut output = engine.build(root, sheet, &BuildOptions::deploy())?;

        if !output.needs_data.is_empty() {
            let mut observations = ObservationMap::new();
            match self.observers.observe_all(&output.needs_data).await {
                Ok(fetched) => observations.extend(fetched),
                Err(CambiumError::Observe(ObserveError::Aggregate { failures, partial })) => {
                    for failure in failures {
                        log.push(Message::warning(format!(
                            "Observer {} failed: {}",
                            failure.name, failure.message
                        )));
                    }
                    observations.extend(partial);
                }
                Err(err) => return Err(err),
            }

            output = engine.build(
                root,
                sheet,
                &BuildOptions::deploy().with_observations(observations),
            )?;
            if !output.needs_data.is_empty() {
                warn!(
                    "{} observer(s) still lack data after observation",
                    output.needs_data.len()
                );
                log.push(Message::warning(format!(
                    "{} observer query set(s) still lack data",
                    output.needs_data.len()
                )));
            }
        }

        output.final_tree.ok_or_else(|| {
            CambiumError::internal("specification built to an empty tree")
        })
    }

    /// Reanimates the previously deployed tree and re-builds it, which
    /// both validates the round-trip and restores succession state.
    fn reanimate_previous(
        &self,
        tree_json: serde_json::Value,
        state: &ComponentStateStore,
    ) -> Result<FinalTree> {
        let tree = FinalTree::from_json(tree_json)?;
        let element = tree.reanimate(&self.reanimate_scope)?;
        let engine = BuildEngine::with_state(state.clone());
        let output = engine.build(&element, &StyleSheet::new(), &BuildOptions::new())?;
        output
            .final_tree
            .ok_or_else(|| CambiumError::internal("previous tree reanimated to nothing"))
    }
}

impl std::fmt::Debug for DeploySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploySession")
            .field("goal", &self.goal)
            .field("dry_run", &self.dry_run)
            .field("backend", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for DeployResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Deployment {} after {} pass(es):", self.status, self.passes)?;
        writeln!(f, "  Nodes: {}", self.counts.total())?;
        writeln!(
            f,
            "  Messages: {} info, {} warning, {} error",
            self.summary.info, self.summary.warning, self.summary.error
        )?;
        for message in &self.messages {
            writeln!(f, "  {message}")?;
        }
        Ok(())
    }
}
