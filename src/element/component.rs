//! Component type definitions and identity.
//!
//! Component types are interned: every [`ComponentType`] carries a
//! process-wide stable tag assigned when the type is created. Selector
//! matching and reanimation compare tags, never names, so two same-named
//! types defined independently do not collide.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::build::BuildContext;
use crate::element::Element;
use crate::error::Result;

/// Process-wide stable identity of a component type.
pub type TypeTag = u64;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// The build closure of a composite component.
///
/// Invoked with the component's current props and state; returns the
/// replacement subtree, or `None` to build to nothing.
pub type BuildFn =
    Arc<dyn Fn(&mut BuildContext<'_>) -> Result<Option<Element>> + Send + Sync>;

/// The capability set of a component type.
#[derive(Clone)]
pub enum ComponentKind {
    /// Terminal component that becomes part of the final tree.
    Primitive {
        /// Whether reaching the deployed state is a no-op for instances
        /// of this type.
        trivial_when_deployed: bool,
    },
    /// Abstract component expanded into a subtree during build.
    Composite {
        /// The expansion function.
        build: BuildFn,
    },
}

struct ComponentDef {
    tag: TypeTag,
    name: String,
    kind: ComponentKind,
}

/// An interned component type.
///
/// Cheap to clone; equality and hashing use the interned tag.
#[derive(Clone)]
pub struct ComponentType(Arc<ComponentDef>);

impl ComponentType {
    fn intern(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self(Arc::new(ComponentDef {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            kind,
        }))
    }

    /// Creates a primitive component type.
    #[must_use]
    pub fn primitive(name: impl Into<String>) -> Self {
        Self::intern(
            name,
            ComponentKind::Primitive {
                trivial_when_deployed: false,
            },
        )
    }

    /// Creates a primitive component type whose deployment is a no-op.
    #[must_use]
    pub fn primitive_trivial(name: impl Into<String>) -> Self {
        Self::intern(
            name,
            ComponentKind::Primitive {
                trivial_when_deployed: true,
            },
        )
    }

    /// Creates a composite component type with the given build function.
    #[must_use]
    pub fn composite<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&mut BuildContext<'_>) -> Result<Option<Element>> + Send + Sync + 'static,
    {
        Self::intern(
            name,
            ComponentKind::Composite {
                build: Arc::new(build),
            },
        )
    }

    /// Returns the display name of the type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Returns the process-wide stable tag of the type.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.0.tag
    }

    /// Returns the component kind.
    #[must_use]
    pub fn kind(&self) -> &ComponentKind {
        &self.0.kind
    }

    /// Returns true if the type is primitive.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self.0.kind, ComponentKind::Primitive { .. })
    }

    /// Returns true if deployed instances of this type complete trivially.
    #[must_use]
    pub fn is_trivial_when_deployed(&self) -> bool {
        matches!(
            self.0.kind,
            ComponentKind::Primitive {
                trivial_when_deployed: true
            }
        )
    }

    /// Returns the build function for composite types.
    #[must_use]
    pub fn build_fn(&self) -> Option<&BuildFn> {
        match &self.0.kind {
            ComponentKind::Composite { build } => Some(build),
            ComponentKind::Primitive { .. } => None,
        }
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.0.tag == other.0.tag
    }
}

impl Eq for ComponentType {}

impl std::hash::Hash for ComponentType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.tag.hash(state);
    }
}

impl std::fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentType")
            .field("name", &self.0.name)
            .field("tag", &self.0.tag)
            .finish()
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.name)
    }
}
