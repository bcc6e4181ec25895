//! Selector matching over mounted element paths.
//!
//! Matching is evaluated right-to-left: the final compound is tested
//! against the deepest path element, then combinators shorten the path
//! and matching recurses into the selector prefix. Descendant combinators
//! try ancestors from nearest to furthest; the first match wins.

use crate::element::{MountedArena, MountedId, PropValue};

use super::selector::{
    AttrOp, Combinator, Compound, Fragment, SelectorBlock, SelectorList,
};

/// Tests a selector list against a root-to-element path.
///
/// Pure with respect to tree content; no-rematch bookkeeping is the
/// caller's concern (see [`super::MatchRegistry`]).
#[must_use]
pub fn matches_selector(list: &SelectorList, path: &[MountedId], arena: &MountedArena) -> bool {
    if path.is_empty() {
        return false;
    }
    list.blocks
        .iter()
        .any(|block| matches_block(block, path, arena))
}

fn matches_block(block: &SelectorBlock, path: &[MountedId], arena: &MountedArena) -> bool {
    matches_from(block, block.compounds.len() - 1, path, arena)
}

fn matches_from(
    block: &SelectorBlock,
    compound_idx: usize,
    path: &[MountedId],
    arena: &MountedArena,
) -> bool {
    if !matches_compound(&block.compounds[compound_idx], path, arena) {
        return false;
    }
    let Some(prev_idx) = compound_idx.checked_sub(1) else {
        return true;
    };
    match block.combinators[prev_idx] {
        Combinator::Child => {
            path.len() > 1 && matches_from(block, prev_idx, &path[..path.len() - 1], arena)
        }
        Combinator::Descendant => {
            // Nearest ancestor first.
            (1..path.len())
                .rev()
                .any(|len| matches_from(block, prev_idx, &path[..len], arena))
        }
    }
}

fn matches_compound(compound: &Compound, path: &[MountedId], arena: &MountedArena) -> bool {
    compound
        .fragments
        .iter()
        .all(|fragment| matches_fragment(fragment, path, arena))
}

fn matches_fragment(fragment: &Fragment, path: &[MountedId], arena: &MountedArena) -> bool {
    let deepest = path[path.len() - 1];
    match fragment {
        Fragment::Tag(component) => arena.get(deepest).element.component() == component,
        Fragment::Attr {
            name,
            op,
            value,
            case_insensitive,
        } => {
            let Some(actual) = arena
                .get(deepest)
                .element
                .prop(name)
                .and_then(PropValue::as_str)
            else {
                return false;
            };
            matches_attr(actual, *op, value.as_deref(), *case_insensitive)
        }
        Fragment::Root => path.len() == 1,
        Fragment::Not(inner) => !matches_selector(inner, path, arena),
    }
}

fn matches_attr(actual: &str, op: AttrOp, expected: Option<&str>, case_insensitive: bool) -> bool {
    let Some(expected) = expected else {
        return op == AttrOp::Exists;
    };
    let (actual, expected) = if case_insensitive {
        (actual.to_lowercase(), expected.to_lowercase())
    } else {
        (actual.to_string(), expected.to_string())
    };
    match op {
        AttrOp::Exists => true,
        AttrOp::Equals => actual == expected,
        AttrOp::Prefix => actual.starts_with(&expected),
        AttrOp::Suffix => actual.ends_with(&expected),
        AttrOp::Contains => actual.contains(&expected),
        AttrOp::Includes => actual.split_whitespace().any(|word| word == expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ComponentType, Element};
    use crate::style::selector::{SelectorList, TypeScope};

    struct Fixture {
        arena: MountedArena,
        path: Vec<MountedId>,
        scope: TypeScope,
    }

    /// Mounts Service(tier=web) > Container(image=nginx:latest).
    fn fixture() -> Fixture {
        let service = ComponentType::primitive("Service");
        let container = ComponentType::primitive("Container");
        let scope = TypeScope::new().with(service.clone()).with(container.clone());

        let mut arena = MountedArena::new();
        let root = arena.mount(
            Element::new(service).with_prop("tier", "web frontend"),
            None,
            "svc",
        );
        let leaf = arena.mount(
            Element::new(container).with_prop("image", "nginx:latest"),
            Some(root),
            "c0",
        );
        Fixture {
            path: arena.path(leaf),
            arena,
            scope,
        }
    }

    fn check(fx: &Fixture, text: &str) -> bool {
        let list = SelectorList::parse(text, &fx.scope).unwrap();
        matches_selector(&list, &fx.path, &fx.arena)
    }

    #[test]
    fn test_tag_match() {
        let fx = fixture();
        assert!(check(&fx, "Container"));
        assert!(!check(&fx, "Service"));
    }

    #[test]
    fn test_child_and_descendant() {
        let fx = fixture();
        assert!(check(&fx, "Service > Container"));
        assert!(check(&fx, "Service Container"));
        assert!(!check(&fx, "Container > Container"));
    }

    #[test]
    fn test_attr_operators() {
        let fx = fixture();
        assert!(check(&fx, "Container[image]"));
        assert!(check(&fx, "Container[image=nginx:latest]"));
        assert!(check(&fx, "Container[image^=nginx]"));
        assert!(check(&fx, "Container[image$=latest]"));
        assert!(check(&fx, "Container[image*=x:l]"));
        assert!(!check(&fx, "Container[image=nginx]"));
        assert!(!check(&fx, "Container[missing]"));
    }

    #[test]
    fn test_attr_includes_and_case() {
        let fx = fixture();
        let root_path = vec![fx.path[0]];
        let list = SelectorList::parse("Service[tier~=frontend]", &fx.scope).unwrap();
        assert!(matches_selector(&list, &root_path, &fx.arena));

        let list = SelectorList::parse("Service[tier~=front]", &fx.scope).unwrap();
        assert!(!matches_selector(&list, &root_path, &fx.arena));

        let list = SelectorList::parse("Service[tier*=\"WEB\" i]", &fx.scope).unwrap();
        assert!(matches_selector(&list, &root_path, &fx.arena));
    }

    #[test]
    fn test_root_pseudo() {
        let fx = fixture();
        let root_path = vec![fx.path[0]];
        let list = SelectorList::parse(":root", &fx.scope).unwrap();
        assert!(matches_selector(&list, &root_path, &fx.arena));
        assert!(!matches_selector(&list, &fx.path, &fx.arena));
    }

    #[test]
    fn test_not_pseudo() {
        let fx = fixture();
        assert!(check(&fx, "Container:not([image^=postgres])"));
        assert!(!check(&fx, "Container:not([image^=nginx])"));
    }

    #[test]
    fn test_disjunction() {
        let fx = fixture();
        assert!(check(&fx, "Service, Container"));
    }

    #[test]
    fn test_descendant_deep() {
        let service = ComponentType::primitive("Service");
        let container = ComponentType::primitive("Container");
        let scope = TypeScope::new().with(service.clone()).with(container.clone());

        let mut arena = MountedArena::new();
        let a = arena.mount(Element::new(service.clone()), None, "a");
        let b = arena.mount(Element::new(container.clone()), Some(a), "b");
        let c = arena.mount(Element::new(container), Some(b), "c");
        let path = arena.path(c);

        let list = SelectorList::parse("Service Container", &scope).unwrap();
        assert!(matches_selector(&list, &path, &arena));

        // Child combinator must not skip a generation.
        let list = SelectorList::parse("Service > Container > Container", &scope).unwrap();
        assert!(matches_selector(&list, &path, &arena));
    }
}
