//! The final primitive tree and its serialized form.
//!
//! A [`FinalTree`] is the build engine's output: an all-primitive element
//! tree ready for deployment. It serializes to JSON for history
//! persistence and reanimates back into an [`Element`] tree by resolving
//! component names through a caller-provided [`TypeScope`], which lets a
//! previous deployment's tree be rebuilt in a fresh process.

use serde::{Deserialize, Serialize};

use crate::element::{Element, Props};
use crate::error::{BuildError, Result};
use crate::style::TypeScope;

/// One node of the final tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalNode {
    /// Component type display name (reanimation key).
    pub component: String,
    /// Lineage-derived element identity.
    pub id: String,
    /// Mount key within the parent.
    pub key: String,
    /// Element props.
    pub props: Props,
    /// Child nodes.
    pub children: Vec<FinalNode>,
    /// Whether reaching the deployed state is a no-op for this node.
    pub trivial: bool,
}

/// The all-primitive output tree of a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalTree {
    /// The root node.
    pub root: FinalNode,
}

impl FinalTree {
    /// Serializes the tree to its persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the props cannot be encoded.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| crate::error::StoreError::serialization(e.to_string()).into())
    }

    /// Deserializes a tree from its persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Reanimate`] if the payload does not encode
    /// a final tree.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| BuildError::reanimate(e.to_string()).into())
    }

    /// Reconstructs an element tree, resolving component names through
    /// the given scope.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Reanimate`] if a component name is not
    /// bound in the scope.
    pub fn reanimate(&self, scope: &TypeScope) -> Result<Element> {
        Self::reanimate_node(&self.root, scope)
    }

    fn reanimate_node(node: &FinalNode, scope: &TypeScope) -> Result<Element> {
        let component = scope.resolve(&node.component).ok_or_else(|| {
            BuildError::reanimate(format!(
                "component type '{}' is not bound in the reanimation scope",
                node.component
            ))
        })?;
        let mut element = Element::new(component.clone()).with_key(node.key.clone());
        for (name, value) in &node.props {
            element = element.with_prop(name.clone(), value.clone());
        }
        let children = node
            .children
            .iter()
            .map(|child| Self::reanimate_node(child, scope))
            .collect::<Result<Vec<_>>>()?;
        Ok(element.with_children(children))
    }

    /// Returns every node id in depth-first order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        Self::collect_ids(&self.root, &mut ids);
        ids
    }

    fn collect_ids(node: &FinalNode, ids: &mut Vec<String>) {
        ids.push(node.id.clone());
        for child in &node.children {
            Self::collect_ids(child, ids);
        }
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&FinalNode> {
        Self::find_node(&self.root, id)
    }

    fn find_node<'a>(node: &'a FinalNode, id: &str) -> Option<&'a FinalNode> {
        if node.id == id {
            return Some(node);
        }
        node.children
            .iter()
            .find_map(|child| Self::find_node(child, id))
    }

    /// Returns (child id, parent id) containment edges, depth-first.
    #[must_use]
    pub fn containment_edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        Self::collect_edges(&self.root, &mut edges);
        edges
    }

    fn collect_edges(node: &FinalNode, edges: &mut Vec<(String, String)>) {
        for child in &node.children {
            edges.push((child.id.clone(), node.id.clone()));
            Self::collect_edges(child, edges);
        }
    }

    /// Returns the total number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.node_ids().len()
    }

    /// Returns true if the tree has only a root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}
