//! Style engine: selector parsing, path matching, and style sheets.
//!
//! A style sheet is an ordered list of rules. Each rule pairs a parsed
//! selector with an override closure that may substitute the matched
//! element during build. Selectors are evaluated right-to-left over the
//! root-to-element path of mounted elements; a per-pass match registry
//! guarantees a rule never matches the same element instance twice.

mod matcher;
mod selector;
mod sheet;

pub use matcher::matches_selector;
pub use selector::{
    AttrOp, Combinator, Compound, Fragment, SelectorBlock, SelectorList, TypeScope,
};
pub use sheet::{
    MatchRecord, MatchRegistry, OverrideContext, OverrideFn, Rule, RuleId, StyleSheet,
};
