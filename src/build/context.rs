//! Build context handed to composite component build functions.

use std::collections::HashMap;

use serde_json::Value;

use crate::element::{Element, Props};
use crate::observe::{ObservationMap, ObserverQuery};

use super::state::ComponentStateStore;

/// Context for one composite component's build invocation.
///
/// Gives the build function access to the component's props and local
/// state, and to the observation side channel. State writes raise the
/// pending-rebuild signal consumed by the engine's fixed-point loop.
pub struct BuildContext<'a> {
    element: &'a Element,
    id: &'a str,
    state: &'a ComponentStateStore,
    observations: &'a ObservationMap,
    executed_queries: &'a mut HashMap<String, Vec<ObserverQuery>>,
    needs_data: &'a mut HashMap<String, Vec<ObserverQuery>>,
    state_changed: &'a mut bool,
}

impl<'a> BuildContext<'a> {
    pub(super) fn new(
        element: &'a Element,
        id: &'a str,
        state: &'a ComponentStateStore,
        observations: &'a ObservationMap,
        executed_queries: &'a mut HashMap<String, Vec<ObserverQuery>>,
        needs_data: &'a mut HashMap<String, Vec<ObserverQuery>>,
        state_changed: &'a mut bool,
    ) -> Self {
        Self {
            element,
            id,
            state,
            observations,
            executed_queries,
            needs_data,
            state_changed,
        }
    }

    /// Returns the element being built.
    #[must_use]
    pub const fn element(&self) -> &Element {
        self.element
    }

    /// Returns the element's props.
    #[must_use]
    pub const fn props(&self) -> &Props {
        self.element.props()
    }

    /// Returns the element's lineage-derived identity.
    #[must_use]
    pub const fn id(&self) -> &str {
        self.id
    }

    /// Returns the component's local state, `Null` if never set.
    #[must_use]
    pub fn state(&self) -> Value {
        self.state.get(self.id).unwrap_or(Value::Null)
    }

    /// Writes the component's local state.
    ///
    /// A write that changes the stored value marks the build pass for
    /// another iteration.
    pub fn set_state(&mut self, value: Value) {
        if self.state.set(self.id, value) {
            *self.state_changed = true;
        }
    }

    /// Requests external data from a named observer.
    ///
    /// The query is recorded for the caller to fulfill. If the current
    /// observation cache holds a response for it, that data is returned;
    /// otherwise the query lands in the needs-data set and `None` is
    /// returned so the component can render a placeholder.
    pub fn observe(&mut self, observer: &str, query: &str) -> Option<&'a Value> {
        let entry = ObserverQuery::new(query);
        let executed = self.executed_queries.entry(observer.to_string()).or_default();
        if !executed.contains(&entry) {
            executed.push(entry.clone());
        }

        let data = self
            .observations
            .get(observer)
            .and_then(|payload| payload.get(query));
        if data.is_none() {
            let needed = self.needs_data.entry(observer.to_string()).or_default();
            if !needed.contains(&entry) {
                needed.push(entry);
            }
        }
        data
    }
}

impl std::fmt::Debug for BuildContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("id", &self.id)
            .field("component", &self.element.component().name())
            .finish_non_exhaustive()
    }
}
