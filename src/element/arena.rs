//! Arena of mounted elements.
//!
//! Mounted elements form a DAG through succession links (original →
//! built-from → built-into). The arena stores immutable node records
//! addressed by opaque [`MountedId`] indices; links are indices, never
//! live back-pointers. Handles are resolved lazily through a separate
//! table mapping handle targets to their current mounted instance.

use std::collections::HashMap;

use super::node::Element;

/// Opaque identity of a mounted element instance within one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountedId(usize);

/// One mounted element record.
#[derive(Debug, Clone)]
pub struct MountedNode {
    /// The element description.
    pub element: Element,
    /// Stable deployment identity derived from the build lineage.
    pub id: String,
    /// Parent instance in the mounted tree, if any.
    pub parent: Option<MountedId>,
    /// First instance in this node's succession chain.
    pub original: Option<MountedId>,
    /// Instance this one was built from, if any.
    pub built_from: Option<MountedId>,
    /// Instance this one was built into, if any.
    pub built_into: Option<MountedId>,
}

/// Arena owning the mounted elements of one build pass.
#[derive(Debug, Default)]
pub struct MountedArena {
    nodes: Vec<MountedNode>,
    handles: HashMap<String, MountedId>,
}

impl MountedArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            handles: HashMap::new(),
        }
    }

    /// Mounts an element under the given parent with the given key,
    /// assigning its lineage-derived identity.
    pub fn mount(&mut self, element: Element, parent: Option<MountedId>, key: &str) -> MountedId {
        let id = match parent {
            Some(p) => format!("{}/{key}", self.nodes[p.0].id),
            None => format!("/{key}"),
        };
        let mounted = MountedId(self.nodes.len());
        self.nodes.push(MountedNode {
            element,
            id,
            parent,
            original: None,
            built_from: None,
            built_into: None,
        });
        mounted
    }

    /// Mounts `element` as the successor of `from`, inheriting its
    /// identity and parent and wiring the succession links.
    pub fn mount_successor(&mut self, element: Element, from: MountedId) -> MountedId {
        let (id, parent, original) = {
            let node = &self.nodes[from.0];
            (node.id.clone(), node.parent, node.original.unwrap_or(from))
        };
        let mounted = MountedId(self.nodes.len());
        self.nodes.push(MountedNode {
            element,
            id,
            parent,
            original: Some(original),
            built_from: Some(from),
            built_into: None,
        });
        self.nodes[from.0].built_into = Some(mounted);
        mounted
    }

    /// Returns the node for an id.
    ///
    /// # Panics
    ///
    /// Panics if the id came from a different arena.
    #[must_use]
    pub fn get(&self, id: MountedId) -> &MountedNode {
        &self.nodes[id.0]
    }

    /// Returns the number of mounted instances.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been mounted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the root-to-node path of mounted ids.
    #[must_use]
    pub fn path(&self, id: MountedId) -> Vec<MountedId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Records that `handle_target` currently resolves to `id`.
    pub fn register_handle(&mut self, handle_target: impl Into<String>, id: MountedId) {
        self.handles.insert(handle_target.into(), id);
    }

    /// Resolves a handle target to its current mounted instance.
    #[must_use]
    pub fn resolve_handle(&self, handle_target: &str) -> Option<MountedId> {
        self.handles.get(handle_target).copied()
    }

    /// Iterates over all mounted nodes with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (MountedId, &MountedNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (MountedId(i), n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ComponentType;

    #[test]
    fn test_lineage_ids() {
        let ty = ComponentType::primitive("Container");
        let mut arena = MountedArena::new();

        let root = arena.mount(Element::new(ty.clone()), None, "root");
        let child = arena.mount(Element::new(ty.clone()), Some(root), "db");
        let grandchild = arena.mount(Element::new(ty), Some(child), "vol-0");

        assert_eq!(arena.get(root).id, "/root");
        assert_eq!(arena.get(child).id, "/root/db");
        assert_eq!(arena.get(grandchild).id, "/root/db/vol-0");
        assert_eq!(arena.path(grandchild), vec![root, child, grandchild]);
    }

    #[test]
    fn test_succession_links() {
        let ty = ComponentType::primitive("Container");
        let mut arena = MountedArena::new();

        let first = arena.mount(Element::new(ty.clone()), None, "root");
        let second = arena.mount_successor(Element::new(ty.clone()), first);
        let third = arena.mount_successor(Element::new(ty), second);

        assert_eq!(arena.get(first).built_into, Some(second));
        assert_eq!(arena.get(second).built_from, Some(first));
        assert_eq!(arena.get(second).original, Some(first));
        assert_eq!(arena.get(third).original, Some(first));
        assert_eq!(arena.get(third).id, "/root");
    }

    #[test]
    fn test_handle_resolution() {
        let ty = ComponentType::primitive("Service");
        let mut arena = MountedArena::new();
        let root = arena.mount(Element::new(ty), None, "svc");
        arena.register_handle("/svc", root);

        assert_eq!(arena.resolve_handle("/svc"), Some(root));
        assert_eq!(arena.resolve_handle("/missing"), None);
    }
}
