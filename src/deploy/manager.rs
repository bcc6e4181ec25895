//! The deployment session phase machine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::build::{ComponentStateStore, FinalTree, StateHasher};
use crate::error::{CambiumError, DeployError, ObserveError, ObserverFailure, Result};
use crate::status::{DeployGoal, DeployStatus, StatusTracker};

use super::executor::{ActOptions, ExecutionSummary, execute_graph};
use super::graph::ActionGraph;
use super::plugin::{Plugin, PluginActOptions, PluginRegistry, PluginStartOptions};

/// Phases of one deployment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PreStart,
    PreObserve,
    Observing,
    Analyzing,
    Acting,
    Finished,
}

/// Options for starting a deployment session.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Identity of the deployment operation.
    pub deploy_id: String,
    /// Direction of the deployment.
    pub goal: DeployGoal,
    /// Deployment data directory (store-owned for the operation).
    pub data_dir: PathBuf,
    /// Shared component-local state handed to every plugin.
    pub state: ComponentStateStore,
}

/// Outcome of one act phase.
#[derive(Debug, Clone, Copy)]
pub struct ActResult {
    /// Every node reached its goal status.
    pub deploy_complete: bool,
    /// Acting changed component-local state; rebuild before declaring
    /// completion.
    pub state_changed: bool,
    /// Per-action accounting.
    pub summary: ExecutionSummary,
}

/// Drives registered plugins through the observe/analyze/act phases.
///
/// Operations must be called in order; out-of-order calls fail with
/// [`DeployError::IllegalSequence`].
pub struct PluginManager {
    phase: Phase,
    plugins: Vec<(String, String, Arc<dyn Plugin>)>,
    goal: Option<DeployGoal>,
    graph: Option<ActionGraph>,
}

impl Phase {
    const fn name(self) -> &'static str {
        match self {
            Self::PreStart => "preStart",
            Self::PreObserve => "preObserve",
            Self::Observing => "observing",
            Self::Analyzing => "analyzing",
            Self::Acting => "acting",
            Self::Finished => "finished",
        }
    }
}

impl PluginManager {
    /// Creates a manager over the registered plugins.
    #[must_use]
    pub fn new(registry: &PluginRegistry) -> Self {
        Self {
            phase: Phase::PreStart,
            plugins: registry.iter(),
            goal: None,
            graph: None,
        }
    }

    /// Returns the current phase name.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        self.phase.name()
    }

    /// Returns the action graph once analysis has run.
    #[must_use]
    pub const fn graph(&self) -> Option<&ActionGraph> {
        self.graph.as_ref()
    }

    fn require(&self, attempted: &str, required: Phase) -> Result<()> {
        if self.phase == required {
            Ok(())
        } else {
            Err(DeployError::illegal_sequence(
                attempted,
                self.phase.name(),
                required.name(),
            )
            .into())
        }
    }

    /// Initializes every plugin with deployment metadata and a private
    /// data directory keyed by package identity + plugin name.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::IllegalSequence`] out of phase order, or
    /// the first plugin initialization error.
    pub async fn start(&mut self, options: StartOptions) -> Result<()> {
        self.require("start", Phase::PreStart)?;
        info!(
            deploy_id = %options.deploy_id,
            goal = %options.goal,
            plugins = self.plugins.len(),
            "Starting deployment session"
        );

        for (package, name, plugin) in &self.plugins {
            let subdir = format!("{package}-{name}").replace(['/', '\\'], "_");
            let data_dir = options.data_dir.join(subdir);
            std::fs::create_dir_all(&data_dir)?;
            plugin
                .start(PluginStartOptions {
                    deploy_id: options.deploy_id.clone(),
                    goal: options.goal,
                    data_dir,
                    state: options.state.clone(),
                })
                .await?;
        }

        self.goal = Some(options.goal);
        self.phase = Phase::PreObserve;
        Ok(())
    }

    /// Runs every plugin's environment observation concurrently.
    ///
    /// Plugins run to completion regardless of individual failures;
    /// after all settle, any failure surfaces as an aggregate error
    /// carrying the partial successful observations.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::IllegalSequence`] out of phase order, or
    /// [`ObserveError::Aggregate`] if any plugin failed.
    pub async fn observe(
        &mut self,
        old: Option<&FinalTree>,
        new: &FinalTree,
    ) -> Result<HashMap<String, Value>> {
        self.require("observe", Phase::PreObserve)?;
        self.phase = Phase::Observing;

        let mut tasks: JoinSet<(String, Result<Value>)> = JoinSet::new();
        for (package, name, plugin) in &self.plugins {
            let key = format!("{package}/{name}");
            let plugin = Arc::clone(plugin);
            let old = old.cloned();
            let new = new.clone();
            tasks.spawn(async move {
                let result = plugin.observe(old.as_ref(), &new).await;
                (key, result)
            });
        }

        let mut observations = HashMap::new();
        let mut failures: Vec<ObserverFailure> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(value))) => {
                    debug!(plugin = %key, "Plugin observation complete");
                    observations.insert(key, value);
                }
                Ok((key, Err(err))) => {
                    warn!(plugin = %key, "Plugin observation failed: {err}");
                    failures.push(ObserverFailure {
                        name: key,
                        message: err.to_string(),
                    });
                }
                Err(join_err) => failures.push(ObserverFailure {
                    name: String::from("<task>"),
                    message: join_err.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            Ok(observations)
        } else {
            Err(ObserveError::Aggregate {
                failures,
                partial: observations,
            }
            .into())
        }
    }

    /// Collects declared actions from every plugin and groups them into
    /// a dependency graph.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::IllegalSequence`] out of phase order, or
    /// a graph construction error.
    pub fn analyze(
        &mut self,
        old: Option<&FinalTree>,
        new: &FinalTree,
        observations: &HashMap<String, Value>,
    ) -> Result<&ActionGraph> {
        self.require("analyze", Phase::Observing)?;

        let mut actions = Vec::new();
        for (package, name, plugin) in &self.plugins {
            let key = format!("{package}/{name}");
            let plugin_observations = observations.get(&key).unwrap_or(&Value::Null);
            let declared = plugin.analyze(old, new, plugin_observations);
            debug!(plugin = %key, actions = declared.len(), "Plugin analysis complete");
            actions.extend(declared);
        }

        info!("Analysis declared {} action(s)", actions.len());
        let graph = ActionGraph::build(actions, old, new)?;
        self.phase = Phase::Analyzing;
        Ok(self.graph.insert(graph))
    }

    /// Executes the action graph and reports whether the deployment is
    /// complete and whether component state changed while acting.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::IllegalSequence`] out of phase order, or
    /// tracker/store errors. Individual action failures are reflected
    /// in node statuses, not surfaced as errors here.
    pub async fn act(
        &mut self,
        tracker: &mut StatusTracker,
        options: ActOptions,
        state: &ComponentStateStore,
    ) -> Result<ActResult> {
        self.require("act", Phase::Analyzing)?;
        self.phase = Phase::Acting;

        let goal = self.goal.unwrap_or(DeployGoal::Deploy);
        for (_, _, plugin) in &self.plugins {
            plugin
                .act(PluginActOptions {
                    dry_run: options.dry_run,
                    goal,
                })
                .await?;
        }

        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| CambiumError::internal("act called without an analyzed graph"))?;

        let hasher = StateHasher::new();
        let before = hasher.fingerprint(state);
        let summary = execute_graph(graph, tracker, options).await?;
        let after = hasher.fingerprint(state);

        let at_goal = tracker.counts().of(DeployStatus::Deployed)
            + tracker.counts().of(DeployStatus::Destroyed);
        let deploy_complete = at_goal == tracker.counts().total();

        info!(%summary, deploy_complete, state_changed = before != after, "Act phase complete");

        // Ready for another observe→analyze→act pass; the outer loop
        // repeats while state keeps changing.
        self.graph = None;
        self.phase = Phase::PreObserve;

        Ok(ActResult {
            deploy_complete,
            state_changed: before != after,
            summary,
        })
    }

    /// Runs plugin cleanup hooks.
    ///
    /// Valid from any started phase; repeated calls are no-ops. Every
    /// plugin's hook runs even if an earlier one fails; the first error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::IllegalSequence`] if the session never
    /// started, or the first plugin cleanup error.
    pub async fn finish(&mut self) -> Result<()> {
        match self.phase {
            Phase::PreStart => {
                return Err(DeployError::illegal_sequence(
                    "finish",
                    Phase::PreStart.name(),
                    "any started phase",
                )
                .into());
            }
            Phase::Finished => return Ok(()),
            _ => {}
        }

        let mut first_error = None;
        for (package, name, plugin) in &self.plugins {
            if let Err(err) = plugin.finish().await {
                warn!("Plugin {package}/{name} cleanup failed: {err}");
                first_error.get_or_insert(err);
            }
        }
        self.phase = Phase::Finished;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("phase", &self.phase.name())
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::FinalNode;
    use crate::deploy::plugin::{Action, ChangeType, PluginRegistration};
    use crate::element::Props;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn tree() -> FinalTree {
        FinalTree {
            root: FinalNode {
                component: String::from("Container"),
                id: String::from("/root"),
                key: String::from("root"),
                props: Props::new(),
                children: vec![],
                trivial: false,
            },
        }
    }

    struct RecordingPlugin {
        calls: Mutex<Vec<&'static str>>,
        fail_observe: bool,
    }

    impl RecordingPlugin {
        fn new(fail_observe: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_observe,
            })
        }
    }

    #[async_trait]
    impl Plugin for RecordingPlugin {
        async fn start(&self, options: PluginStartOptions) -> Result<()> {
            assert!(options.data_dir.exists());
            self.calls.lock().unwrap().push("start");
            Ok(())
        }

        async fn observe(&self, _old: Option<&FinalTree>, _new: &FinalTree) -> Result<Value> {
            self.calls.lock().unwrap().push("observe");
            if self.fail_observe {
                Err(CambiumError::internal("cloud unreachable"))
            } else {
                Ok(json!({"running": []}))
            }
        }

        fn analyze(
            &self,
            _old: Option<&FinalTree>,
            _new: &FinalTree,
            _observations: &Value,
        ) -> Vec<Action> {
            self.calls.lock().unwrap().push("analyze");
            vec![
                Action::new(ChangeType::Create, "create root", || async { Ok(()) })
                    .with_change(ChangeType::Create, "/root", "new"),
            ]
        }

        async fn finish(&self) -> Result<()> {
            self.calls.lock().unwrap().push("finish");
            Ok(())
        }
    }

    fn registry(plugin: Arc<RecordingPlugin>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginRegistration {
                package: String::from("test-pkg"),
                name: String::from("recorder"),
                plugin,
            })
            .unwrap();
        registry
    }

    fn start_options(dir: &tempfile::TempDir) -> StartOptions {
        StartOptions {
            deploy_id: String::from("deploy-1"),
            goal: DeployGoal::Deploy,
            data_dir: dir.path().to_path_buf(),
            state: ComponentStateStore::new(),
        }
    }

    #[tokio::test]
    async fn test_full_phase_sequence() {
        let plugin = RecordingPlugin::new(false);
        let mut manager = PluginManager::new(&registry(Arc::clone(&plugin)));
        let new = tree();

        let dir = tempfile::tempdir().unwrap();
        manager.start(start_options(&dir)).await.unwrap();
        let observations = manager.observe(None, &new).await.unwrap();
        assert!(observations.contains_key("test-pkg/recorder"));

        let graph = manager.analyze(None, &new, &observations).unwrap();
        let specs = graph.node_specs(&new);

        let mut tracker = StatusTracker::new(
            DeployGoal::Deploy,
            specs,
            "step-1",
            Arc::new(MemoryStore::new()),
        );
        let state = ComponentStateStore::new();
        let result = manager
            .act(&mut tracker, ActOptions::default(), &state)
            .await
            .unwrap();
        assert!(result.deploy_complete);
        assert!(!result.state_changed);

        manager.finish().await.unwrap();
        assert_eq!(
            *plugin.calls.lock().unwrap(),
            vec!["start", "observe", "analyze", "finish"]
        );
    }

    #[tokio::test]
    async fn test_illegal_sequence() {
        let plugin = RecordingPlugin::new(false);
        let mut manager = PluginManager::new(&registry(plugin));
        let new = tree();

        let err = manager.observe(None, &new).await.unwrap_err();
        let CambiumError::Deploy(DeployError::IllegalSequence {
            attempted,
            current,
            required,
        }) = err
        else {
            panic!("expected illegal sequence");
        };
        assert_eq!(attempted, "observe");
        assert_eq!(current, "preStart");
        assert_eq!(required, "preObserve");
    }

    #[tokio::test]
    async fn test_finish_before_start_rejected_then_idempotent() {
        let plugin = RecordingPlugin::new(false);
        let mut manager = PluginManager::new(&registry(Arc::clone(&plugin)));
        assert!(manager.finish().await.is_err());

        let dir = tempfile::tempdir().unwrap();
        manager.start(start_options(&dir)).await.unwrap();
        manager.finish().await.unwrap();
        manager.finish().await.unwrap();
        assert_eq!(
            plugin
                .calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| **c == "finish")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_observe_failure_carries_partial() {
        let good = RecordingPlugin::new(false);
        let bad = RecordingPlugin::new(true);
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginRegistration {
                package: String::from("pkg-good"),
                name: String::from("recorder"),
                plugin: good,
            })
            .unwrap();
        registry
            .register(PluginRegistration {
                package: String::from("pkg-bad"),
                name: String::from("recorder"),
                plugin: bad,
            })
            .unwrap();

        let mut manager = PluginManager::new(&registry);
        let new = tree();
        let dir = tempfile::tempdir().unwrap();
        manager.start(start_options(&dir)).await.unwrap();

        let err = manager.observe(None, &new).await.unwrap_err();
        let CambiumError::Observe(ObserveError::Aggregate { failures, partial }) = err else {
            panic!("expected aggregate error");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "pkg-bad/recorder");
        assert!(partial.contains_key("pkg-good/recorder"));

        // The session proceeds with the partial observations.
        assert!(manager.analyze(None, &new, &partial).is_ok());
    }
}
