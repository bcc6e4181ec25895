//! Style sheets, rules, and per-pass match bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::element::{Element, MountedArena, MountedId};
use crate::error::Result;

use super::matcher::matches_selector;
use super::selector::{SelectorList, TypeScope};

/// Identity of a rule within one style sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub usize);

/// Context handed to an override closure.
#[derive(Debug)]
pub struct OverrideContext<'a> {
    /// The matched element.
    pub element: &'a Element,
    /// Lineage-derived identity of the matched instance.
    pub id: &'a str,
    /// Root-to-element path of the matched instance.
    pub path: &'a [MountedId],
}

/// Override closure: matched element + context → replacement or `None`.
pub type OverrideFn =
    Arc<dyn Fn(&OverrideContext<'_>) -> Result<Option<Element>> + Send + Sync>;

/// A single style rule: parsed selector + override.
#[derive(Clone)]
pub struct Rule {
    selector: SelectorList,
    override_fn: OverrideFn,
    rematch: bool,
}

/// An ordered list of style rules.
#[derive(Clone, Default)]
pub struct StyleSheet {
    rules: Vec<Rule>,
}

/// Per-instance match bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct MatchRecord {
    /// Rules that have already matched this instance.
    pub matched: HashSet<RuleId>,
    /// Administrative cutoff: no rule may match this instance.
    pub never_match: bool,
}

/// Per-build-pass registry preventing double matches.
#[derive(Debug, Default)]
pub struct MatchRegistry {
    records: HashMap<MountedId, MatchRecord>,
}

impl Rule {
    /// Parses the selector text and pairs it with an override closure.
    ///
    /// # Errors
    ///
    /// Returns the selector parse error, if any.
    pub fn parse<F>(selector: &str, scope: &TypeScope, override_fn: F) -> Result<Self>
    where
        F: Fn(&OverrideContext<'_>) -> Result<Option<Element>> + Send + Sync + 'static,
    {
        Ok(Self {
            selector: SelectorList::parse(selector, scope)?,
            override_fn: Arc::new(override_fn),
            rematch: false,
        })
    }

    /// Allows the rule to match the replacement instance it produced.
    ///
    /// By default every match on the original instance propagates to
    /// the replacement, so a rule can never re-trigger on its own
    /// output; this escape hatch exempts the producing rule from that
    /// propagation.
    #[must_use]
    pub const fn with_rematch(mut self, rematch: bool) -> Self {
        self.rematch = rematch;
        self
    }

    /// Returns true if the rule may re-match its own replacements.
    #[must_use]
    pub const fn rematches(&self) -> bool {
        self.rematch
    }

    /// Returns the parsed selector.
    #[must_use]
    pub const fn selector(&self) -> &SelectorList {
        &self.selector
    }

    /// Invokes the override closure.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error.
    pub fn apply(&self, ctx: &OverrideContext<'_>) -> Result<Option<Element>> {
        (self.override_fn.as_ref())(ctx)
    }
}

impl StyleSheet {
    /// Creates an empty sheet.
    #[must_use]
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Appends a rule, returning the modified sheet.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Appends a rule.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Returns the number of rules.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the sheet has no rules.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns a rule by id.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    /// Finds the first rule that matches the path and has not already
    /// matched the deepest instance in this pass.
    #[must_use]
    pub fn first_match(
        &self,
        path: &[MountedId],
        arena: &MountedArena,
        registry: &MatchRegistry,
    ) -> Option<RuleId> {
        let instance = *path.last()?;
        if registry.never_match(instance) {
            return None;
        }
        self.rules.iter().enumerate().find_map(|(idx, rule)| {
            let id = RuleId(idx);
            if registry.has_matched(instance, id) {
                return None;
            }
            matches_selector(&rule.selector, path, arena).then_some(id)
        })
    }
}

impl MatchRegistry {
    /// Creates an empty registry (one per build pass).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the rule already matched this instance.
    #[must_use]
    pub fn has_matched(&self, instance: MountedId, rule: RuleId) -> bool {
        self.records
            .get(&instance)
            .is_some_and(|r| r.matched.contains(&rule))
    }

    /// Records that the rule matched this instance.
    pub fn mark_matched(&mut self, instance: MountedId, rule: RuleId) {
        self.records.entry(instance).or_default().matched.insert(rule);
    }

    /// Copies every match from one instance to another.
    ///
    /// This is the default propagation when an override produces a
    /// replacement: rules that matched the original never re-match the
    /// instance they (transitively) produced, while rules that never
    /// matched the original see the replacement as a fresh instance.
    pub fn copy_matches(&mut self, from: MountedId, to: MountedId) {
        let matched: Vec<RuleId> = self
            .records
            .get(&from)
            .map(|r| r.matched.iter().copied().collect())
            .unwrap_or_default();
        let record = self.records.entry(to).or_default();
        record.matched.extend(matched);
    }

    /// Copies every match from one instance to another, except the
    /// given rule (the `rematch` escape hatch).
    pub fn copy_matches_except(&mut self, from: MountedId, to: MountedId, except: RuleId) {
        let matched: Vec<RuleId> = self
            .records
            .get(&from)
            .map(|r| r.matched.iter().copied().filter(|&id| id != except).collect())
            .unwrap_or_default();
        let record = self.records.entry(to).or_default();
        record.matched.extend(matched);
    }

    /// Administratively cuts this instance (and its style search) off.
    pub fn set_never_match(&mut self, instance: MountedId) {
        self.records.entry(instance).or_default().never_match = true;
    }

    /// Returns true if the instance is administratively cut off.
    #[must_use]
    pub fn never_match(&self, instance: MountedId) -> bool {
        self.records
            .get(&instance)
            .is_some_and(|r| r.never_match)
    }

    /// Returns the record for an instance, if any matches were recorded.
    #[must_use]
    pub fn record(&self, instance: MountedId) -> Option<&MatchRecord> {
        self.records.get(&instance)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("selector", &self.selector)
            .field("rematch", &self.rematch)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for StyleSheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StyleSheet")
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ComponentType;

    fn fixture() -> (MountedArena, Vec<MountedId>, TypeScope, ComponentType) {
        let container = ComponentType::primitive("Container");
        let scope = TypeScope::new().with(container.clone());
        let mut arena = MountedArena::new();
        let root = arena.mount(Element::new(container.clone()), None, "c");
        let path = arena.path(root);
        (arena, path, scope, container)
    }

    #[test]
    fn test_first_match_order_and_registry() {
        let (arena, path, scope, _ty) = fixture();
        let sheet = StyleSheet::new()
            .with_rule(Rule::parse("Container", &scope, |_| Ok(None)).unwrap())
            .with_rule(Rule::parse("Container", &scope, |_| Ok(None)).unwrap());

        let mut registry = MatchRegistry::new();
        let first = sheet.first_match(&path, &arena, &registry).unwrap();
        assert_eq!(first, RuleId(0));

        registry.mark_matched(path[0], first);
        let second = sheet.first_match(&path, &arena, &registry).unwrap();
        assert_eq!(second, RuleId(1));

        registry.mark_matched(path[0], second);
        assert!(sheet.first_match(&path, &arena, &registry).is_none());
    }

    #[test]
    fn test_never_match_cutoff() {
        let (arena, path, scope, _ty) = fixture();
        let sheet = StyleSheet::new()
            .with_rule(Rule::parse("Container", &scope, |_| Ok(None)).unwrap());

        let mut registry = MatchRegistry::new();
        registry.set_never_match(path[0]);
        assert!(sheet.first_match(&path, &arena, &registry).is_none());
    }

    #[test]
    fn test_copy_matches() {
        let (mut arena, path, scope, ty) = fixture();
        let sheet = StyleSheet::new()
            .with_rule(Rule::parse("Container", &scope, |_| Ok(None)).unwrap());

        let mut registry = MatchRegistry::new();
        registry.mark_matched(path[0], RuleId(0));

        let replacement = arena.mount_successor(Element::new(ty), path[0]);
        registry.copy_matches(path[0], replacement);

        assert!(registry.has_matched(replacement, RuleId(0)));
        assert!(
            sheet
                .first_match(&arena.path(replacement), &arena, &registry)
                .is_none()
        );
    }
}
