//! Environment observers and their registry.
//!
//! Observers fetch external data that observer-backed components need
//! during build. The build engine collects the queries each component
//! registers; the caller fulfills them through the registry between
//! passes and replays the observations into the next build.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{ObserveError, ObserverFailure, Result};

/// A single query an observer-backed component needs fulfilled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObserverQuery {
    /// Opaque query payload, interpreted by the observer.
    pub query: String,
}

/// Observation payloads keyed by observer name.
pub type ObservationMap = HashMap<String, Value>;

/// Capability set of an environment observer.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Describes the queries this observer accepts.
    fn schema(&self) -> Value;

    /// Fetches observations for the given queries.
    async fn observe(&self, queries: &[ObserverQuery]) -> Result<Value>;
}

/// Registry of observers, injected into the engine at construction.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: HashMap<String, Arc<dyn Observer>>,
}

impl ObserverQuery {
    /// Creates a query from its payload.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl ObserverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer under the given name.
    ///
    /// # Errors
    ///
    /// Returns [`ObserveError::DuplicateObserver`] if the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        observer: Arc<dyn Observer>,
    ) -> Result<()> {
        let name = name.into();
        if self.observers.contains_key(&name) {
            return Err(ObserveError::DuplicateObserver { name }.into());
        }
        debug!("Registered observer: {name}");
        self.observers.insert(name, observer);
        Ok(())
    }

    /// Looks up an observer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Observer>> {
        self.observers.get(name)
    }

    /// Returns the registered observer names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.observers.keys().map(String::as_str).collect()
    }

    /// Fulfills every query set concurrently.
    ///
    /// All observers run to completion regardless of individual
    /// failures; failed observers are reported together afterwards with
    /// the successful observations attached.
    ///
    /// # Errors
    ///
    /// Returns [`ObserveError::Aggregate`] if any observer failed, with
    /// partial results, or if a query names an unregistered observer.
    pub async fn observe_all(
        &self,
        queries: &HashMap<String, Vec<ObserverQuery>>,
    ) -> Result<ObservationMap> {
        let mut tasks: JoinSet<(String, Result<Value>)> = JoinSet::new();
        let mut failures: Vec<ObserverFailure> = Vec::new();

        for (name, observer_queries) in queries {
            match self.observers.get(name) {
                Some(observer) => {
                    let observer = Arc::clone(observer);
                    let name = name.clone();
                    let observer_queries = observer_queries.clone();
                    tasks.spawn(async move {
                        let result = observer.observe(&observer_queries).await;
                        (name, result)
                    });
                }
                None => failures.push(ObserverFailure {
                    name: name.clone(),
                    message: String::from("observer is not registered"),
                }),
            }
        }

        let mut observations = ObservationMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(value))) => {
                    debug!("Observer {name} returned data");
                    observations.insert(name, value);
                }
                Ok((name, Err(err))) => {
                    warn!("Observer {name} failed: {err}");
                    failures.push(ObserverFailure {
                        name,
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
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CambiumError;
    use serde_json::json;

    struct EchoObserver;

    #[async_trait]
    impl Observer for EchoObserver {
        fn schema(&self) -> Value {
            json!({ "query": "string" })
        }

        async fn observe(&self, queries: &[ObserverQuery]) -> Result<Value> {
            Ok(json!(queries.iter().map(|q| q.query.clone()).collect::<Vec<_>>()))
        }
    }

    struct FailingObserver;

    #[async_trait]
    impl Observer for FailingObserver {
        fn schema(&self) -> Value {
            json!({})
        }

        async fn observe(&self, _queries: &[ObserverQuery]) -> Result<Value> {
            Err(CambiumError::internal("connection refused"))
        }
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ObserverRegistry::new();
        registry.register("dns", Arc::new(EchoObserver)).unwrap();
        let err = registry.register("dns", Arc::new(EchoObserver)).unwrap_err();
        assert!(matches!(
            err,
            CambiumError::Observe(ObserveError::DuplicateObserver { ref name }) if name == "dns"
        ));
    }

    #[tokio::test]
    async fn test_observe_all_success() {
        let mut registry = ObserverRegistry::new();
        registry.register("dns", Arc::new(EchoObserver)).unwrap();

        let mut queries = HashMap::new();
        queries.insert(
            String::from("dns"),
            vec![ObserverQuery::new("lookup db.internal")],
        );

        let observations = registry.observe_all(&queries).await.unwrap();
        assert_eq!(observations["dns"], json!(["lookup db.internal"]));
    }

    #[tokio::test]
    async fn test_observe_all_partial_failure() {
        let mut registry = ObserverRegistry::new();
        registry.register("dns", Arc::new(EchoObserver)).unwrap();
        registry.register("cloud", Arc::new(FailingObserver)).unwrap();

        let mut queries = HashMap::new();
        queries.insert(String::from("dns"), vec![ObserverQuery::new("q")]);
        queries.insert(String::from("cloud"), vec![ObserverQuery::new("q")]);

        let err = registry.observe_all(&queries).await.unwrap_err();
        let CambiumError::Observe(ObserveError::Aggregate { failures, partial }) = err else {
            panic!("expected aggregate error");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "cloud");
        assert!(partial.contains_key("dns"));
    }
}
