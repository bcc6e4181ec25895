//! Immutable element tree nodes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::component::ComponentType;

/// Ordered mapping of named prop values.
pub type Props = IndexMap<String, PropValue>;

/// An opaque reference to another element, resolved lazily against the
/// mounted arena's handle table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handle {
    /// Element identity the handle points at.
    pub target: String,
}

/// A single prop value: plain JSON data or a handle to another element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropValue {
    /// An element handle.
    Handle {
        /// Marker object distinguishing handles from plain data.
        #[serde(rename = "$handle")]
        handle: Handle,
    },
    /// Plain JSON data.
    Json(Value),
}

/// An immutable description of one node in a specification tree.
#[derive(Debug, Clone)]
pub struct Element {
    component: ComponentType,
    props: Props,
    children: Vec<Element>,
    key: Option<String>,
}

impl Handle {
    /// Creates a handle pointing at the given element identity.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl PropValue {
    /// Creates a string-valued prop.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Json(Value::String(value.into()))
    }

    /// Creates a handle-valued prop.
    #[must_use]
    pub const fn handle(handle: Handle) -> Self {
        Self::Handle { handle }
    }

    /// Returns the string value, if this prop holds one.
    ///
    /// Attribute selectors operate only on string-valued props; handles
    /// and non-string JSON return `None`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the JSON value, if this prop holds plain data.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Handle { .. } => None,
        }
    }

    /// Returns the handle, if this prop holds one.
    #[must_use]
    pub const fn as_handle(&self) -> Option<&Handle> {
        match self {
            Self::Handle { handle } => Some(handle),
            Self::Json(_) => None,
        }
    }
}

impl From<Value> for PropValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl Element {
    /// Creates an element of the given component type with no props or
    /// children.
    #[must_use]
    pub fn new(component: ComponentType) -> Self {
        Self {
            component,
            props: Props::new(),
            children: Vec::new(),
            key: None,
        }
    }

    /// Sets a prop, returning the modified element.
    #[must_use]
    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Sets the sibling-disambiguation key, returning the modified element.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Appends a child, returning the modified element.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Replaces the children, returning the modified element.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Self>) -> Self {
        self.children = children;
        self
    }

    /// Returns the component type.
    #[must_use]
    pub const fn component(&self) -> &ComponentType {
        &self.component
    }

    /// Returns the props.
    #[must_use]
    pub const fn props(&self) -> &Props {
        &self.props
    }

    /// Looks up a prop by name.
    #[must_use]
    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    /// Returns the children.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Returns the explicit key, if one was set.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns the key used for mounting: the explicit key, or one
    /// auto-derived from the component name and the sibling ordinal.
    #[must_use]
    pub fn mount_key(&self, ordinal: usize) -> String {
        self.key.as_ref().map_or_else(
            || format!("{}-{ordinal}", self.component.name()),
            Clone::clone,
        )
    }
}
