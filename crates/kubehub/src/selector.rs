//! Equality-based label selectors (`a=b`, `a==b`, `a!=b`, `a`, `!a`).

use std::collections::BTreeMap;

use crate::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LabelRequirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl LabelRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            LabelRequirement::Equals(k, v) => labels.get(k) == Some(v),
            LabelRequirement::NotEquals(k, v) => labels.get(k) != Some(v),
            LabelRequirement::Exists(k) => labels.contains_key(k),
            LabelRequirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

pub(crate) fn parse_label_selector(selector: &str) -> StoreResult<Vec<LabelRequirement>> {
    let mut out = Vec::new();
    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let req = if let Some((k, v)) = term.split_once("!=") {
            LabelRequirement::NotEquals(key(k, term)?, v.trim().to_string())
        } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
            LabelRequirement::Equals(key(k, term)?, v.trim().to_string())
        } else if let Some(k) = term.strip_prefix('!') {
            LabelRequirement::NotExists(key(k, term)?)
        } else if term.contains(' ') || term.contains('(') {
            return Err(StoreError::Invalid(format!("unsupported label selector term {:?}", term)));
        } else {
            LabelRequirement::Exists(term.to_string())
        };
        out.push(req);
    }
    Ok(out)
}

fn key(raw: &str, term: &str) -> StoreResult<String> {
    let k = raw.trim();
    if k.is_empty() {
        return Err(StoreError::Invalid(format!("empty label key in {:?}", term)));
    }
    Ok(k.to_string())
}

pub(crate) fn matches_all(reqs: &[LabelRequirement], labels: &BTreeMap<String, String>) -> bool {
    reqs.iter().all(|r| r.matches(labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_operators() {
        let reqs = parse_label_selector("app=web, tier!=db,env==prod,canary,!legacy").expect("parse");
        assert_eq!(
            reqs,
            vec![
                LabelRequirement::Equals("app".into(), "web".into()),
                LabelRequirement::NotEquals("tier".into(), "db".into()),
                LabelRequirement::Equals("env".into(), "prod".into()),
                LabelRequirement::Exists("canary".into()),
                LabelRequirement::NotExists("legacy".into()),
            ]
        );
    }

    #[test]
    fn set_based_terms_are_rejected() {
        assert!(parse_label_selector("env in (prod,dev)").is_err());
        assert!(parse_label_selector("=x").is_err());
    }

    #[test]
    fn matching() {
        let reqs = parse_label_selector("app=web,!legacy").expect("parse");
        assert!(matches_all(&reqs, &labels(&[("app", "web")])));
        assert!(!matches_all(&reqs, &labels(&[("app", "web"), ("legacy", "1")])));
        assert!(!matches_all(&reqs, &labels(&[("app", "api")])));
        assert!(matches_all(&[], &labels(&[])));
    }
}
