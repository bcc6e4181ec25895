//! Plugin contract, action types, and the plugin registry.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::build::{ComponentStateStore, FinalTree};
use crate::error::{DeployError, Result};
use crate::status::DeployGoal;

/// Change classification of an action or of one affected element.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// The element is being created.
    Create,
    /// The element is being updated in place.
    Update,
    /// The element is being deleted.
    Delete,
    /// The element is being torn down and recreated.
    Replace,
    /// Nothing to do for the element.
    None,
}

/// One element affected by an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionChange {
    /// Change classification for this element.
    pub change_type: ChangeType,
    /// Affected element identity.
    pub element_id: String,
    /// Human-readable detail.
    pub detail: String,
}

/// Boxed asynchronous action executor.
pub type ActionExec =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// A unit of deployment work declared by a plugin.
#[derive(Clone)]
pub struct Action {
    /// Change classification of the whole action.
    pub change_type: ChangeType,
    /// Elements the action affects.
    pub changes: Vec<ActionChange>,
    /// Human-readable description.
    pub description: String,
    /// Element identities that must settle before this action runs,
    /// in addition to edges derived from containment and handles.
    pub depends_on: Vec<String>,
    act: ActionExec,
}

/// Options handed to every plugin at session start.
#[derive(Debug, Clone)]
pub struct PluginStartOptions {
    /// Identity of the deployment operation.
    pub deploy_id: String,
    /// Direction of the deployment.
    pub goal: DeployGoal,
    /// Private data directory for this plugin.
    pub data_dir: PathBuf,
    /// Shared component-local state; writes from action executors are
    /// detected as `state_changed` after acting.
    pub state: ComponentStateStore,
}

/// Options handed to every plugin when the act phase begins.
#[derive(Debug, Clone, Copy)]
pub struct PluginActOptions {
    /// True when no executor will actually run.
    pub dry_run: bool,
    /// Direction of the deployment.
    pub goal: DeployGoal,
}

/// Capability set of a deployment plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Initializes the plugin for one deployment session.
    async fn start(&self, options: PluginStartOptions) -> Result<()>;

    /// Observes the environment relevant to the old and new trees.
    async fn observe(&self, old: Option<&FinalTree>, new: &FinalTree) -> Result<Value>;

    /// Compares the trees plus observations and declares actions.
    ///
    /// Synchronous: analysis is pure comparison over already-fetched
    /// data.
    fn analyze(&self, old: Option<&FinalTree>, new: &FinalTree, observations: &Value)
    -> Vec<Action>;

    /// Invoked when the act phase begins.
    async fn act(&self, options: PluginActOptions) -> Result<()> {
        let _ = options;
        Ok(())
    }

    /// Cleans the plugin up at session end.
    async fn finish(&self) -> Result<()>;
}

/// One plugin registration: package identity + name + implementation.
#[derive(Clone)]
pub struct PluginRegistration {
    /// Package the plugin ships in.
    pub package: String,
    /// Plugin name within the package.
    pub name: String,
    /// The plugin implementation.
    pub plugin: Arc<dyn Plugin>,
}

/// Registry of plugins, injected into the manager at construction.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<(String, String), Arc<dyn Plugin>>,
}

impl Action {
    /// Creates an action with the given classification, description,
    /// and executor.
    #[must_use]
    pub fn new<F, Fut>(change_type: ChangeType, description: impl Into<String>, act: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            change_type,
            changes: Vec::new(),
            description: description.into(),
            depends_on: Vec::new(),
            act: Arc::new(move || {
                Box::pin(act()) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
            }),
        }
    }

    /// Records an affected element.
    #[must_use]
    pub fn with_change(
        mut self,
        change_type: ChangeType,
        element_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        self.changes.push(ActionChange {
            change_type,
            element_id: element_id.into(),
            detail: detail.into(),
        });
        self
    }

    /// Declares an element this action must wait for.
    #[must_use]
    pub fn with_dependency(mut self, element_id: impl Into<String>) -> Self {
        self.depends_on.push(element_id.into());
        self
    }

    /// Returns the affected element identities.
    #[must_use]
    pub fn element_ids(&self) -> Vec<&str> {
        self.changes
            .iter()
            .map(|change| change.element_id.as_str())
            .collect()
    }

    /// Returns the executor's future.
    #[must_use]
    pub fn exec_future(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        (self.act.as_ref())()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin.
    ///
    /// Re-registering the identical implementation is a silent no-op;
    /// registering a different implementation under an already-taken
    /// package + name is fatal. Distinct packages may reuse names.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::PluginConflict`] on a conflicting
    /// registration.
    pub fn register(&mut self, registration: PluginRegistration) -> Result<()> {
        let key = (registration.package.clone(), registration.name.clone());
        if let Some(existing) = self.plugins.get(&key) {
            if Arc::ptr_eq(existing, &registration.plugin) {
                debug!(
                    "Ignoring identical re-registration of plugin {}/{}",
                    registration.package, registration.name
                );
                return Ok(());
            }
            return Err(DeployError::PluginConflict {
                package: registration.package,
                name: registration.name,
            }
            .into());
        }
        debug!(
            "Registered plugin {}/{}",
            registration.package, registration.name
        );
        self.plugins.insert(key, registration.plugin);
        Ok(())
    }

    /// Returns every registration as (package, name, plugin).
    #[must_use]
    pub fn iter(&self) -> Vec<(String, String, Arc<dyn Plugin>)> {
        let mut items: Vec<_> = self
            .plugins
            .iter()
            .map(|((package, name), plugin)| {
                (package.clone(), name.clone(), Arc::clone(plugin))
            })
            .collect();
        items.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        items
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns true if no plugin is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("change_type", &self.change_type)
            .field("description", &self.description)
            .field("changes", &self.changes.len())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .plugins
            .keys()
            .map(|(package, name)| format!("{package}/{name}"))
            .collect();
        f.debug_struct("PluginRegistry").field("plugins", &names).finish()
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.change_type, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CambiumError;
    use serde_json::json;

    struct NullPlugin;

    #[async_trait]
    impl Plugin for NullPlugin {
        async fn start(&self, _options: PluginStartOptions) -> Result<()> {
            Ok(())
        }
        async fn observe(&self, _old: Option<&FinalTree>, _new: &FinalTree) -> Result<Value> {
            Ok(json!({}))
        }
        fn analyze(
            &self,
            _old: Option<&FinalTree>,
            _new: &FinalTree,
            _observations: &Value,
        ) -> Vec<Action> {
            vec![]
        }
        async fn finish(&self) -> Result<()> {
            Ok(())
        }
    }

    fn registration(package: &str, name: &str, plugin: Arc<dyn Plugin>) -> PluginRegistration {
        PluginRegistration {
            package: package.to_string(),
            name: name.to_string(),
            plugin,
        }
    }

    #[test]
    fn test_identical_reregistration_is_noop() {
        let plugin: Arc<dyn Plugin> = Arc::new(NullPlugin);
        let mut registry = PluginRegistry::new();
        registry
            .register(registration("pkg", "docker", Arc::clone(&plugin)))
            .unwrap();
        registry
            .register(registration("pkg", "docker", Arc::clone(&plugin)))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_is_fatal() {
        let mut registry = PluginRegistry::new();
        registry
            .register(registration("pkg", "docker", Arc::new(NullPlugin)))
            .unwrap();
        let err = registry
            .register(registration("pkg", "docker", Arc::new(NullPlugin)))
            .unwrap_err();
        assert!(matches!(
            err,
            CambiumError::Deploy(DeployError::PluginConflict { .. })
        ));
    }

    #[test]
    fn test_colliding_names_across_packages() {
        let mut registry = PluginRegistry::new();
        registry
            .register(registration("pkg-a", "docker", Arc::new(NullPlugin)))
            .unwrap();
        registry
            .register(registration("pkg-b", "docker", Arc::new(NullPlugin)))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_action_executor_runs() {
        let action = Action::new(ChangeType::Create, "create web", || async { Ok(()) })
            .with_change(ChangeType::Create, "/root/web", "new container");
        assert_eq!(action.element_ids(), vec!["/root/web"]);
        action.exec_future().await.unwrap();
    }
}
