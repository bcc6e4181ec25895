//! Component-local state and its change-detection fingerprint.
//!
//! State is keyed by the element's lineage-derived identity so it
//! survives across build passes and across the instances a succession
//! chain produces. The store is shared: the build engine mutates it
//! through build contexts and action executors may mutate it while
//! acting, so `state_changed` detection fingerprints the whole store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Shared store of component-local state, keyed by element identity.
#[derive(Debug, Clone, Default)]
pub struct ComponentStateStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

/// Hasher for deterministic state-store fingerprints.
#[derive(Debug, Default)]
pub struct StateHasher;

impl ComponentStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated from a serialized snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: HashMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    /// Returns the state for an element, if any was set.
    #[must_use]
    pub fn get(&self, element_id: &str) -> Option<Value> {
        self.inner
            .lock()
            .map_or(None, |map| map.get(element_id).cloned())
    }

    /// Sets the state for an element.
    ///
    /// Returns true if the stored value actually changed.
    pub fn set(&self, element_id: &str, value: Value) -> bool {
        let Ok(mut map) = self.inner.lock() else {
            return false;
        };
        match map.get(element_id) {
            Some(existing) if *existing == value => false,
            _ => {
                map.insert(element_id.to_string(), value);
                true
            }
        }
    }

    /// Returns a serializable snapshot of the whole store.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.lock().map(|map| map.clone()).unwrap_or_default()
    }

    /// Returns the number of elements with state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    /// Returns true if no element has state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateHasher {
    /// Creates a new state hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a deterministic fingerprint of the store contents.
    #[must_use]
    pub fn fingerprint(&self, store: &ComponentStateStore) -> String {
        let snapshot = store.snapshot();
        let mut entries: Vec<_> = snapshot.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (key, value) in entries {
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short fingerprint (first 8 characters) for display.
    #[must_use]
    pub fn short_fingerprint(&self, store: &ComponentStateStore) -> String {
        self.fingerprint(store).chars().take(8).collect()
    }
}
