//! Field selectors: comma-separated `path=value`, `path==value` and
//! `path!=value` clauses evaluated against an object's JSON tree.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use smallvec::SmallVec;
use thiserror::Error;

use crate::jsonpath::{lookup, render};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
}

/// One `path op value` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub path: String,
    pub operator: Operator,
    pub value: String,
}

impl Requirement {
    /// True when the path resolves and compares as required. An unresolvable
    /// path never matches, whatever the operator.
    pub fn matches(&self, tree: &Value) -> bool {
        let Ok(found) = lookup(tree, &format!("$.{}", self.path)) else { return false };
        let found = render(found);
        match self.operator {
            Operator::Equals => found == self.value,
            Operator::NotEquals => found != self.value,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.operator {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
        };
        write!(f, "{}{}{}", self.path, op, escape(&self.value))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid selector term {0:?}: expected key=value, key==value or key!=value")]
    MissingOperator(String),
    #[error("invalid selector term {0:?}: empty field path")]
    EmptyPath(String),
    #[error("invalid selector term {0:?}: dangling escape")]
    DanglingEscape(String),
}

/// Conjunction of requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: SmallVec<[Requirement; 4]>,
}

impl FieldSelector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut requirements = SmallVec::new();
        for term in split_terms(input) {
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_term(term)?);
        }
        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] { &self.requirements }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }

    pub fn matches(&self, tree: &Value) -> bool { self.requirements.iter().all(|r| r.matches(tree)) }
}

impl FromStr for FieldSelector {
    type Err = SelectorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

/// Split on commas not preceded by a backslash.
fn split_terms(input: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ',' => {
                terms.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&input[start..]);
    terms
}

/// The leftmost operator splits the term: `a=b!=c` is `a` equal to `b!=c`.
fn find_operator(term: &str) -> Option<(usize, Operator, usize)> {
    let bytes = term.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'!' if bytes.get(i + 1) == Some(&b'=') => return Some((i, Operator::NotEquals, 2)),
            b'=' if bytes.get(i + 1) == Some(&b'=') => return Some((i, Operator::Equals, 2)),
            b'=' => return Some((i, Operator::Equals, 1)),
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_term(term: &str) -> Result<Requirement, SelectorError> {
    let (at, operator, len) = find_operator(term).ok_or_else(|| SelectorError::MissingOperator(term.to_string()))?;
    let (path, raw) = (&term[..at], &term[at + len..]);
    let path = path.trim();
    if path.is_empty() {
        return Err(SelectorError::EmptyPath(term.to_string()));
    }
    let value = unescape(raw).ok_or_else(|| SelectorError::DanglingEscape(term.to_string()))?;
    Ok(Requirement { path: path.to_string(), operator, value })
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next()?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Value {
        json!({
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"nodeName": "n1"},
            "status": {"phase": "Running"}
        })
    }

    #[test]
    fn parses_all_operators() {
        let sel = FieldSelector::parse("status.phase=Running,spec.nodeName==n1,metadata.name!=db").expect("parse");
        let ops: Vec<_> = sel.requirements().iter().map(|r| r.operator).collect();
        assert_eq!(ops, vec![Operator::Equals, Operator::Equals, Operator::NotEquals]);
        assert_eq!(sel.to_string(), "status.phase=Running,spec.nodeName=n1,metadata.name!=db");
    }

    #[test]
    fn leftmost_operator_wins() {
        let sel = FieldSelector::parse("a=b!=c").expect("parse");
        let req = &sel.requirements()[0];
        assert_eq!((req.path.as_str(), req.operator, req.value.as_str()), ("a", Operator::Equals, "b!=c"));

        let sel = FieldSelector::parse("a!=b=c").expect("parse");
        let req = &sel.requirements()[0];
        assert_eq!((req.path.as_str(), req.operator, req.value.as_str()), ("a", Operator::NotEquals, "b=c"));

        let sel = FieldSelector::parse("a==b==c").expect("parse");
        assert_eq!(sel.requirements()[0].value, "b==c");
    }

    #[test]
    fn escaped_commas_stay_in_value() {
        let sel = FieldSelector::parse(r"metadata.name=a\,b").expect("parse");
        assert_eq!(sel.requirements().len(), 1);
        assert_eq!(sel.requirements()[0].value, "a,b");
    }

    #[test]
    fn malformed_terms_error() {
        assert_eq!(
            FieldSelector::parse("status.phase").unwrap_err(),
            SelectorError::MissingOperator("status.phase".into())
        );
        assert!(matches!(FieldSelector::parse("=x"), Err(SelectorError::EmptyPath(_))));
        assert!(matches!(FieldSelector::parse(r"a=b\"), Err(SelectorError::DanglingEscape(_))));
    }

    #[test]
    fn evaluates_against_tree() {
        let tree = pod();
        assert!(FieldSelector::parse("status.phase=Running").expect("sel").matches(&tree));
        assert!(FieldSelector::parse("status.phase!=Pending,spec.nodeName=n1").expect("sel").matches(&tree));
        assert!(!FieldSelector::parse("status.phase=Pending").expect("sel").matches(&tree));
        // Unresolvable paths never match, even for !=.
        assert!(!FieldSelector::parse("status.hostIP!=1.2.3.4").expect("sel").matches(&tree));
        assert!(FieldSelector::parse("").expect("empty").matches(&tree));
    }
}
