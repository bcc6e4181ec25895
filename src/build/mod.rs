//! Build engine: reduces a specification tree to a final primitive tree.
//!
//! The engine traverses the element tree depth-first, applying style
//! overrides and expanding composite components until only primitives
//! remain, then repeats whole passes until component-local state stops
//! changing (fixed point) or the iteration cap is hit.

mod context;
mod engine;
mod state;
mod tree;

pub use context::BuildContext;
pub use engine::{BuildEngine, BuildOptions, BuildOutput, Recorder};
pub use state::{ComponentStateStore, StateHasher};
pub use tree::{FinalNode, FinalTree};
