//! Action dependency graph construction.
//!
//! Edges come from three sources: dependencies the plugin declared on
//! the action, parent/child containment in the final trees, and handle
//! props pointing at other elements. Creation flows parents-first;
//! deletion flows children-first.

use std::collections::{HashMap, HashSet};

use serde_json::{Value, json};
use tracing::debug;

use crate::build::FinalTree;
use crate::error::{DeployError, Result};
use crate::status::{NodeSpec, WaitInfo};

use super::plugin::{Action, ChangeType};

struct GraphEntry {
    action: Action,
    predecessors: HashSet<usize>,
    dependents: HashSet<usize>,
}

/// Dependency graph over the actions of one deployment step.
pub struct ActionGraph {
    nodes: Vec<GraphEntry>,
    owner: HashMap<String, usize>,
}

impl ActionGraph {
    /// Builds the graph from declared actions and the two trees.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::UnknownDependency`] if a declared
    /// dependency names an element no action or tree knows, and
    /// [`DeployError::DependencyCycle`] if the edges do not admit a
    /// topological order.
    pub fn build(
        actions: Vec<Action>,
        old: Option<&FinalTree>,
        new: &FinalTree,
    ) -> Result<Self> {
        let mut owner: HashMap<String, usize> = HashMap::new();
        for (idx, action) in actions.iter().enumerate() {
            for element_id in action.element_ids() {
                owner.entry(element_id.to_string()).or_insert(idx);
            }
        }

        let mut nodes: Vec<GraphEntry> = actions
            .into_iter()
            .map(|action| GraphEntry {
                action,
                predecessors: HashSet::new(),
                dependents: HashSet::new(),
            })
            .collect();

        let known_element = |id: &str| {
            owner.contains_key(id)
                || new.node(id).is_some()
                || old.is_some_and(|tree| tree.node(id).is_some())
        };

        // Declared dependencies.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (idx, entry) in nodes.iter().enumerate() {
            for dep in &entry.action.depends_on {
                if !known_element(dep) {
                    return Err(DeployError::UnknownDependency {
                        element_id: dep.clone(),
                    }
                    .into());
                }
                if let Some(&owning) = owner.get(dep.as_str())
                    && owning != idx
                {
                    edges.push((owning, idx));
                }
            }
        }

        // Containment: parents before children when building up,
        // children before parents when tearing down.
        let mut containment = new.containment_edges();
        if let Some(old_tree) = old {
            containment.extend(old_tree.containment_edges());
        }
        for (child, parent) in containment {
            let (Some(&child_action), Some(&parent_action)) =
                (owner.get(child.as_str()), owner.get(parent.as_str()))
            else {
                continue;
            };
            if child_action == parent_action {
                continue;
            }
            if nodes[child_action].action.change_type == ChangeType::Delete {
                edges.push((child_action, parent_action));
            } else {
                edges.push((parent_action, child_action));
            }
        }

        // Handles: an element depends on whatever its handles point at.
        for node_id in new.node_ids() {
            let Some(node) = new.node(&node_id) else {
                continue;
            };
            for value in node.props.values() {
                let Some(handle) = value.as_handle() else {
                    continue;
                };
                let (Some(&dependent), Some(&target)) = (
                    owner.get(node_id.as_str()),
                    owner.get(handle.target.as_str()),
                ) else {
                    continue;
                };
                if dependent != target {
                    edges.push((target, dependent));
                }
            }
        }

        for (before, after) in edges {
            nodes[before].dependents.insert(after);
            nodes[after].predecessors.insert(before);
        }

        let graph = Self { nodes, owner };
        graph.check_acyclic()?;
        debug!(
            actions = graph.nodes.len(),
            elements = graph.owner.len(),
            "Built action graph"
        );
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|entry| entry.predecessors.len())
            .collect();
        let mut queue: Vec<usize> = pending
            .iter()
            .enumerate()
            .filter_map(|(idx, &count)| (count == 0).then_some(idx))
            .collect();
        let mut visited = 0;

        while let Some(idx) = queue.pop() {
            visited += 1;
            for &dependent in &self.nodes[idx].dependents {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if visited == self.nodes.len() {
            Ok(())
        } else {
            let elements: Vec<String> = pending
                .iter()
                .enumerate()
                .filter(|&(_, &count)| count > 0)
                .flat_map(|(idx, _)| {
                    self.nodes[idx]
                        .action
                        .element_ids()
                        .into_iter()
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .collect();
            Err(DeployError::DependencyCycle {
                elements: elements.join(", "),
            }
            .into())
        }
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no action was declared.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns an action by index.
    #[must_use]
    pub fn action(&self, idx: usize) -> &Action {
        &self.nodes[idx].action
    }

    /// Returns the indices of an action's predecessors.
    #[must_use]
    pub fn predecessors(&self, idx: usize) -> &HashSet<usize> {
        &self.nodes[idx].predecessors
    }

    /// Returns the indices of an action's dependents.
    #[must_use]
    pub fn dependents(&self, idx: usize) -> &HashSet<usize> {
        &self.nodes[idx].dependents
    }

    /// Returns the action owning an element, if any.
    #[must_use]
    pub fn owner(&self, element_id: &str) -> Option<usize> {
        self.owner.get(element_id).copied()
    }

    /// Serializes the graph for history persistence.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|entry| {
                let mut predecessors: Vec<usize> =
                    entry.predecessors.iter().copied().collect();
                predecessors.sort_unstable();
                json!({
                    "changeType": entry.action.change_type,
                    "description": entry.action.description,
                    "elements": entry.action.element_ids(),
                    "predecessors": predecessors,
                })
            })
            .collect();
        json!({ "actions": nodes })
    }

    /// Derives the deploy node set for the status tracker: every node
    /// of the new tree plus every synthetic element actions touch.
    #[must_use]
    pub fn node_specs(&self, new: &FinalTree) -> Vec<NodeSpec> {
        let mut specs = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for node_id in new.node_ids() {
            let trivial_node = new.node(&node_id).is_some_and(|node| node.trivial);
            let wait = self.wait_info(&node_id, trivial_node);
            seen.insert(node_id.clone());
            specs.push(NodeSpec {
                id: node_id,
                primitive: true,
                wait,
            });
        }

        for (element_id, _) in &self.owner {
            if seen.contains(element_id) {
                continue;
            }
            let wait = self.wait_info(element_id, false);
            specs.push(NodeSpec {
                id: element_id.clone(),
                primitive: false,
                wait,
            });
        }

        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    fn wait_info(&self, element_id: &str, trivial_node: bool) -> WaitInfo {
        let acting = self
            .owner
            .get(element_id)
            .is_some_and(|&idx| self.nodes[idx].action.change_type != ChangeType::None);
        WaitInfo {
            acting,
            trivial: trivial_node || !acting,
        }
    }

}

impl std::fmt::Debug for ActionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionGraph")
            .field("actions", &self.nodes.len())
            .field("elements", &self.owner.len())
            .finish()
    }
}
