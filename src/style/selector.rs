//! Selector grammar and parser.
//!
//! A selector list is a disjunction of complex selectors separated by
//! commas. A complex selector is a sequence of compound selectors joined
//! by child (`>`) or descendant (whitespace) combinators. A compound
//! selector is a conjunction of fragments: a tag, attribute matches,
//! and pseudo-classes.
//!
//! Tag names are bound against a [`TypeScope`] at parse time, so matching
//! later compares interned component type identities rather than names.

use std::collections::HashMap;

use crate::element::ComponentType;
use crate::error::{Result, StyleError};

/// Binds tag names appearing in selector text to component types.
#[derive(Debug, Default, Clone)]
pub struct TypeScope {
    types: HashMap<String, ComponentType>,
}

impl TypeScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a component type under its own display name.
    #[must_use]
    pub fn with(mut self, component: ComponentType) -> Self {
        self.types
            .insert(component.name().to_string(), component);
        self
    }

    /// Binds a component type under an explicit alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>, component: ComponentType) -> Self {
        self.types.insert(alias.into(), component);
        self
    }

    /// Resolves a tag name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&ComponentType> {
        self.types.get(name)
    }
}

/// Attribute comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    /// `[k]` — the prop exists with a string value.
    Exists,
    /// `[k=v]` — exact equality.
    Equals,
    /// `[k^=v]` — prefix match.
    Prefix,
    /// `[k$=v]` — suffix match.
    Suffix,
    /// `[k*=v]` — substring match.
    Contains,
    /// `[k~=v]` — whitespace-delimited word match.
    Includes,
}

/// A single conjunct within a compound selector.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// Component type identity match.
    Tag(ComponentType),
    /// Attribute match against a string-valued prop.
    Attr {
        /// Prop name.
        name: String,
        /// Comparison operator.
        op: AttrOp,
        /// Comparison value; `None` for existence checks.
        value: Option<String>,
        /// Case-insensitive comparison (`i` flag).
        case_insensitive: bool,
    },
    /// `:root` — the element is the tree root.
    Root,
    /// `:not(...)` — negation of a nested selector over the same path.
    Not(SelectorList),
}

/// Combinator between two compound selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// `>` — the left compound must match the immediate parent.
    Child,
    /// Whitespace — the left compound may match any strict ancestor.
    Descendant,
}

/// One complex selector: compounds joined by combinators.
///
/// `combinators[i]` sits between `compounds[i]` and `compounds[i + 1]`.
#[derive(Debug, Clone)]
pub struct SelectorBlock {
    /// Compound selectors, leftmost first.
    pub compounds: Vec<Compound>,
    /// Combinators between adjacent compounds.
    pub combinators: Vec<Combinator>,
}

/// A conjunction of fragments tested against a single path element.
#[derive(Debug, Clone)]
pub struct Compound {
    /// The conjunct fragments.
    pub fragments: Vec<Fragment>,
}

/// A parsed selector list (disjunction of blocks).
#[derive(Debug, Clone)]
pub struct SelectorList {
    /// The disjunct blocks.
    pub blocks: Vec<SelectorBlock>,
}

impl SelectorList {
    /// Parses selector text, binding tag names through the given scope.
    ///
    /// # Errors
    ///
    /// Returns [`StyleError::Syntax`] for malformed text,
    /// [`StyleError::UnsupportedSelector`] for syntax the matcher does
    /// not implement, and [`StyleError::UnknownTag`] for tag names the
    /// scope does not bind.
    pub fn parse(text: &str, scope: &TypeScope) -> Result<Self> {
        let mut parser = Parser {
            input: text,
            pos: 0,
            scope,
        };
        let list = parser.parse_list()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(StyleError::syntax(
                format!("unexpected trailing input '{}'", parser.rest()),
                parser.pos,
            )
            .into());
        }
        Ok(list)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    scope: &'a TypeScope,
}

impl Parser<'_> {
    fn parse_list(&mut self) -> Result<SelectorList> {
        let mut blocks = vec![self.parse_block()?];
        loop {
            self.skip_ws();
            if self.eat(',') {
                blocks.push(self.parse_block()?);
            } else {
                break;
            }
        }
        Ok(SelectorList { blocks })
    }

    fn parse_block(&mut self) -> Result<SelectorBlock> {
        self.skip_ws();
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            if let Some(c @ ('+' | '~')) = self.peek() {
                return Err(StyleError::unsupported(c.to_string()).into());
            }
            if self.eat('>') {
                self.skip_ws();
                combinators.push(Combinator::Child);
            } else if had_ws && self.at_compound_start() {
                combinators.push(Combinator::Descendant);
            } else {
                break;
            }
            compounds.push(self.parse_compound()?);
        }
        Ok(SelectorBlock {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<Compound> {
        let mut fragments = Vec::new();
        loop {
            match self.peek() {
                Some(c) if c == '[' => fragments.push(self.parse_attr()?),
                Some(c) if c == ':' => fragments.push(self.parse_pseudo()?),
                Some(c) if is_ident_start(c) => {
                    if !fragments.is_empty() {
                        return Err(StyleError::syntax(
                            "tag fragment must come first in a compound selector",
                            self.pos,
                        )
                        .into());
                    }
                    fragments.push(self.parse_tag()?);
                }
                Some(c) if c == '*' || c == '#' || c == '.' || c == '+' || c == '~' => {
                    return Err(StyleError::unsupported(c.to_string()).into());
                }
                _ => break,
            }
        }
        if fragments.is_empty() {
            return Err(
                StyleError::syntax("expected a selector fragment", self.pos).into(),
            );
        }
        Ok(Compound { fragments })
    }

    fn parse_tag(&mut self) -> Result<Fragment> {
        let name = self.ident();
        let component = self.scope.resolve(&name).ok_or(StyleError::UnknownTag {
            name: name.clone(),
        })?;
        Ok(Fragment::Tag(component.clone()))
    }

    fn parse_pseudo(&mut self) -> Result<Fragment> {
        let start = self.pos;
        self.expect(':')?;
        let name = self.ident();
        match name.as_str() {
            "root" => Ok(Fragment::Root),
            "not" => {
                self.expect('(')?;
                let inner = self.parse_list()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(Fragment::Not(inner))
            }
            "" => Err(StyleError::syntax("expected pseudo-class name", start).into()),
            other => Err(StyleError::unsupported(format!(":{other}")).into()),
        }
    }

    fn parse_attr(&mut self) -> Result<Fragment> {
        self.expect('[')?;
        self.skip_ws();
        let name = self.ident();
        if name.is_empty() {
            return Err(StyleError::syntax("expected attribute name", self.pos).into());
        }
        self.skip_ws();

        let op = if self.eat(']') {
            return Ok(Fragment::Attr {
                name,
                op: AttrOp::Exists,
                value: None,
                case_insensitive: false,
            });
        } else if self.eat_str("^=") {
            AttrOp::Prefix
        } else if self.eat_str("$=") {
            AttrOp::Suffix
        } else if self.eat_str("*=") {
            AttrOp::Contains
        } else if self.eat_str("~=") {
            AttrOp::Includes
        } else if self.eat('=') {
            AttrOp::Equals
        } else if let Some(c) = self.peek() {
            return Err(StyleError::unsupported(format!("[{name}{c}...]")).into());
        } else {
            return Err(StyleError::syntax("unterminated attribute selector", self.pos).into());
        };

        self.skip_ws();
        let value = self.attr_value()?;
        self.skip_ws();

        let case_insensitive = if self.peek() == Some('i') || self.peek() == Some('I') {
            self.pos += 1;
            self.skip_ws();
            true
        } else {
            false
        };

        self.expect(']')?;
        Ok(Fragment::Attr {
            name,
            op,
            value: Some(value),
            case_insensitive,
        })
    }

    fn attr_value(&mut self) -> Result<String> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += quote.len_utf8();
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == quote {
                        let value = self.input[start..self.pos].to_string();
                        self.pos += quote.len_utf8();
                        return Ok(value);
                    }
                    self.pos += c.len_utf8();
                }
                Err(StyleError::syntax("unterminated quoted value", start).into())
            }
            _ => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || c == ']' {
                        break;
                    }
                    self.pos += c.len_utf8();
                }
                if self.pos == start {
                    return Err(
                        StyleError::syntax("expected attribute value", start).into()
                    );
                }
                Ok(self.input[start..self.pos].to_string())
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        if let Some(c) = self.peek()
            && is_ident_start(c)
        {
            self.pos += c.len_utf8();
            while let Some(c) = self.peek() {
                if is_ident_continue(c) {
                    self.pos += c.len_utf8();
                } else {
                    break;
                }
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn at_compound_start(&self) -> bool {
        matches!(self.peek(), Some(c) if is_ident_start(c) || c == '[' || c == ':' || c == '*' || c == '#' || c == '.')
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        self.pos != start
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        if self.input[self.pos..].starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(StyleError::syntax(format!("expected '{expected}'"), self.pos).into())
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CambiumError;

    fn scope() -> TypeScope {
        TypeScope::new()
            .with(ComponentType::primitive("Container"))
            .with(ComponentType::primitive("Service"))
    }

    #[test]
    fn test_parse_tag_and_attr() {
        let list = SelectorList::parse("Container[image^=nginx]", &scope()).unwrap();
        assert_eq!(list.blocks.len(), 1);
        let block = &list.blocks[0];
        assert_eq!(block.compounds.len(), 1);
        assert_eq!(block.compounds[0].fragments.len(), 2);
        assert!(matches!(block.compounds[0].fragments[0], Fragment::Tag(_)));
        assert!(matches!(
            block.compounds[0].fragments[1],
            Fragment::Attr {
                op: AttrOp::Prefix,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_combinators() {
        let list = SelectorList::parse("Service > Container", &scope()).unwrap();
        assert_eq!(list.blocks[0].combinators, vec![Combinator::Child]);

        let list = SelectorList::parse("Service Container", &scope()).unwrap();
        assert_eq!(list.blocks[0].combinators, vec![Combinator::Descendant]);
    }

    #[test]
    fn test_parse_disjunction() {
        let list = SelectorList::parse("Container, Service", &scope()).unwrap();
        assert_eq!(list.blocks.len(), 2);
    }

    #[test]
    fn test_parse_pseudo() {
        let list = SelectorList::parse(":root > Container:not([tier=web])", &scope()).unwrap();
        let last = list.blocks[0].compounds.last().unwrap();
        assert!(matches!(last.fragments[1], Fragment::Not(_)));
    }

    #[test]
    fn test_quoted_attr_value_with_flag() {
        let list = SelectorList::parse("Container[image=\"Nginx:Latest\" i]", &scope()).unwrap();
        let Fragment::Attr {
            value,
            case_insensitive,
            ..
        } = &list.blocks[0].compounds[0].fragments[1]
        else {
            panic!("expected attribute fragment");
        };
        assert_eq!(value.as_deref(), Some("Nginx:Latest"));
        assert!(case_insensitive);
    }

    #[test]
    fn test_unknown_tag() {
        let err = SelectorList::parse("Missing", &scope()).unwrap_err();
        assert!(matches!(
            err,
            CambiumError::Style(StyleError::UnknownTag { ref name }) if name == "Missing"
        ));
    }

    #[test]
    fn test_unsupported_fragments() {
        for text in ["#ident", ".class", "Container + Service", ":hover", "*"] {
            let err = SelectorList::parse(text, &scope()).unwrap_err();
            assert!(
                matches!(err, CambiumError::Style(StyleError::UnsupportedSelector { .. })),
                "expected unsupported selector for {text}, got {err}"
            );
        }
    }

    #[test]
    fn test_malformed_selector() {
        for text in ["", "Container[", "Container[image", ",Container", ":not(Container"] {
            let err = SelectorList::parse(text, &scope()).unwrap_err();
            assert!(
                matches!(err, CambiumError::Style(StyleError::Syntax { .. })),
                "expected syntax error for {text:?}, got {err}"
            );
        }
    }
}
