//! Dotted JSON path lookup (`$.spec.containers[0].image`).

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path {0:?} must start with '$'")]
    MissingRoot(String),
    #[error("empty segment in path {0:?}")]
    EmptySegment(String),
    #[error("malformed index in segment {0:?}")]
    BadIndex(String),
    #[error("key {0:?} not found")]
    KeyNotFound(String),
    #[error("{0:?} is not a mapping")]
    NotAMapping(String),
    #[error("{0:?} is not a sequence")]
    NotASequence(String),
    #[error("index {0} out of range")]
    IndexOutOfRange(i64),
}

/// Resolve `path` against `root`. Negative indices count from the end.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Result<&'a Value, PathError> {
    let rest = path.strip_prefix('$').ok_or_else(|| PathError::MissingRoot(path.to_string()))?;
    if rest.is_empty() {
        return Ok(root);
    }
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    let segments: Vec<&str> = rest.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PathError::EmptySegment(path.to_string()));
    }
    descend(root, &segments)
}

fn descend<'a>(node: &'a Value, segments: &[&str]) -> Result<&'a Value, PathError> {
    let Some((head, rest)) = segments.split_first() else { return Ok(node) };
    let (key, indices) = split_segment(head)?;
    let mut cur = node;
    if !key.is_empty() {
        let map = cur.as_object().ok_or_else(|| PathError::NotAMapping(key.to_string()))?;
        cur = map.get(key).ok_or_else(|| PathError::KeyNotFound(key.to_string()))?;
    }
    for idx in indices {
        let items = cur.as_array().ok_or_else(|| PathError::NotASequence(head.to_string()))?;
        let pos = if idx < 0 { items.len() as i64 + idx } else { idx };
        cur = usize::try_from(pos).ok().and_then(|p| items.get(p)).ok_or(PathError::IndexOutOfRange(idx))?;
    }
    descend(cur, rest)
}

/// `name[0][1]` -> (`name`, [0, 1])
fn split_segment(seg: &str) -> Result<(&str, Vec<i64>), PathError> {
    let Some(open) = seg.find('[') else { return Ok((seg, Vec::new())) };
    let key = &seg[..open];
    let mut indices = Vec::new();
    let mut rest = &seg[open..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[').ok_or_else(|| PathError::BadIndex(seg.to_string()))?;
        let close = inner.find(']').ok_or_else(|| PathError::BadIndex(seg.to_string()))?;
        let idx = inner[..close].trim().parse::<i64>().map_err(|_| PathError::BadIndex(seg.to_string()))?;
        indices.push(idx);
        rest = &inner[close + 1..];
    }
    Ok((key, indices))
}

/// Format a value the way field comparisons see it: strings bare, `null` as
/// `<nil>`, everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "<nil>".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
