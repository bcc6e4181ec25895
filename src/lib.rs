// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Cambium
//!
//! A declarative, style-driven element tree deployment engine.
//!
//! ## Overview
//!
//! Cambium lets operators describe infrastructure as a tree of composable
//! components and drives it to a deployed state:
//!
//! - Describe infrastructure as an element tree of abstract and primitive
//!   components
//! - Substitute and override components with a CSS-like style sheet
//! - Reduce the tree to concrete primitives through a fixed-point build
//! - Execute plugin-declared actions in dependency order with per-node
//!   status tracking and resumable history
//!
//! ## Architecture
//!
//! The engine has two tightly coupled halves:
//!
//! 1. **Build**: the specification tree is expanded depth-first; style
//!    rules substitute matched elements (each rule matches an instance at
//!    most once), composite components expand to subtrees, and whole
//!    passes repeat until component-local state stops changing.
//! 2. **Deploy**: plugins observe the environment, compare old and new
//!    final trees, and declare actions; the orchestrator executes them
//!    with concurrency bounded only by dependency edges, tracking a
//!    per-node state machine and committing history at every phase
//!    boundary.
//!
//! ## Modules
//!
//! - [`element`]: element model, component types, mounted arena
//! - [`style`]: selector parsing, path matching, style sheets
//! - [`build`]: fixed-point build engine and the final tree
//! - [`observe`]: environment observers and their registry
//! - [`deploy`]: plugins, action graphs, and the phase machine
//! - [`status`]: per-node deploy status tracking
//! - [`store`]: deployment history persistence
//! - [`session`]: the outer build-and-deploy loop
//!
//! ## Example
//!
//! ```
//! use cambium::{ComponentType, Element, Rule, StyleSheet, TypeScope};
//!
//! let container = ComponentType::primitive("Container");
//! let scope = TypeScope::new().with(container.clone());
//!
//! let styled = container.clone();
//! let sheet = StyleSheet::new().with_rule(
//!     Rule::parse("Container[tier=web]", &scope, move |ctx| {
//!         let mut replacement = Element::new(styled.clone())
//!             .with_prop("hardened", "true");
//!         for (name, value) in ctx.element.props() {
//!             replacement = replacement.with_prop(name.clone(), value.clone());
//!         }
//!         Ok(Some(replacement))
//!     })
//!     .unwrap(),
//! );
//!
//! let root = Element::new(container.clone())
//!     .with_key("root")
//!     .with_child(Element::new(container).with_prop("tier", "web"));
//!
//! let engine = cambium::BuildEngine::new();
//! let output = engine
//!     .build(&root, &sheet, &cambium::BuildOptions::new())
//!     .unwrap();
//! assert!(output.final_tree.is_some());
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod build;
pub mod deploy;
pub mod element;
pub mod error;
pub mod message;
pub mod observe;
pub mod session;
pub mod status;
pub mod store;
pub mod style;

// ============================================================================
// Re-exports
// ============================================================================

pub use build::{BuildEngine, BuildOptions, BuildOutput, ComponentStateStore, FinalNode, FinalTree};
pub use deploy::{
    ActOptions, Action, ActionGraph, ChangeType, Plugin, PluginManager, PluginRegistration,
    PluginRegistry, StartOptions,
};
pub use element::{ComponentType, Element, Handle, MountedArena, MountedId, PropValue};
pub use error::{CambiumError, Result};
pub use message::{Message, MessageLog, MessageSummary, Severity};
pub use observe::{ObservationMap, Observer, ObserverQuery, ObserverRegistry};
pub use session::{DeployResult, DeploySession};
pub use status::{DeployGoal, DeployOpStatus, DeployStatus, StatusTracker};
pub use store::{DeploymentStore, HistoryEntry, HistoryStatus, MemoryStore};
pub use style::{MatchRegistry, Rule, RuleId, StyleSheet, TypeScope};
