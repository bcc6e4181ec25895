//! Element model: component types, immutable tree nodes, and the mounted
//! element arena.
//!
//! An [`Element`] is an immutable description of one node in a
//! specification tree. Mounting an element into a [`MountedArena`] assigns
//! it a stable identity derived from its build lineage and records
//! succession links as the build engine replaces it with styled or
//! expanded instances.

mod arena;
mod component;
mod node;

pub use arena::{MountedArena, MountedId, MountedNode};
pub use component::{BuildFn, ComponentKind, ComponentType, TypeTag};
pub use node::{Element, Handle, PropValue, Props};
