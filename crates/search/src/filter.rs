//! Per-object filter and ordering predicates over the metadata envelope.

use std::collections::BTreeMap;

use kapis_core::MetaView;

use crate::query::{Field, SortField};

/// One `field=value` filter as handed to a filter function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter<'a> {
    pub field: &'a Field,
    pub value: &'a str,
}

/// Metadata filter for every field except `fieldSelector`.
pub fn meta_filter(meta: &MetaView<'_>, field: &Field, value: &str) -> bool {
    match field {
        Field::Names => value.split(',').any(|n| n == meta.name),
        Field::Name => meta.name.contains(value),
        Field::Uid => meta.uid == value,
        Field::Namespace => meta.namespace == value,
        Field::OwnerReference => meta.owner_references.iter().any(|o| o.uid == value),
        Field::OwnerKind => meta.owner_references.iter().any(|o| o.kind == value),
        Field::Label => label_match(meta.labels, value),
        Field::Annotation => label_match(meta.annotations, value),
        Field::FieldSelector | Field::Other(_) => false,
    }
}

/// `key=value`, bare `key` (any value), or `key!=value` (key present with a
/// different value). A value of `*` matches any value.
pub fn label_match(labels: Option<&BTreeMap<String, String>>, filter: &str) -> bool {
    let (mut key, value) = match filter.split_once('=') {
        Some((k, v)) => (k, v),
        None => (filter, "*"),
    };
    let negated = key.ends_with('!');
    if negated {
        key = &key[..key.len() - 1];
    }
    let Some(actual) = labels.and_then(|l| l.get(key)) else { return false };
    if negated {
        actual != value
    } else {
        value == "*" || actual == value
    }
}

/// True when `left` outranks `right` under `sort_by`. Creation-time ties fall
/// back to name; a missing timestamp ranks lowest.
pub fn compare_meta(left: &MetaView<'_>, right: &MetaView<'_>, sort_by: SortField) -> bool {
    match sort_by {
        SortField::Name => left.name > right.name,
        SortField::CreateTime => {
            if left.creation_timestamp == right.creation_timestamp {
                left.name > right.name
            } else {
                left.creation_timestamp > right.creation_timestamp
            }
        }
    }
}
