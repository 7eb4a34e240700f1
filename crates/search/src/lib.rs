//! kapis search: filter, sort and paginate resource objects for list
//! requests.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::time::Instant;

use kapis_core::{MetadataAccessor, ResourceObject};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::debug;

pub mod filter;
pub mod jsonpath;
pub mod query;
pub mod selector;

pub use filter::{compare_meta, label_match, meta_filter, Filter};
pub use query::{Field, Pagination, Query, SortField};
pub use selector::{FieldSelector, SelectorError};

/// Objects the default pipeline can evaluate: metadata plus a JSON tree for
/// field selectors.
pub trait Queryable: MetadataAccessor {
    fn tree(&self) -> Option<Value>;
}

impl Queryable for ResourceObject {
    fn tree(&self) -> Option<Value> {
        match self.to_value() {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(error = %e, "search: object not serializable");
                None
            }
        }
    }
}

/// Slice bounds for `total` items under optional paging.
pub fn page_range(pagination: Option<&Pagination>, total: usize) -> (usize, usize) {
    match pagination {
        Some(p) => p.range(total),
        None => (0, total),
    }
}

/// Filter, sort and paginate with caller-supplied predicates.
///
/// `compare(a, b, field)` reports whether `a` outranks `b`; the result is
/// descending unless the query asks for ascending. `matches` sees each
/// filter in turn and must accept all of them. Returns the page and the
/// number of items that passed filtering.
pub fn list_with<T, C, F>(objects: Vec<T>, query: &Query, compare: C, matches: F) -> (Vec<T>, usize)
where
    C: Fn(&T, &T, SortField) -> bool,
    F: Fn(&T, &Filter<'_>) -> bool,
{
    let mut kept: Vec<T> = if query.filters.is_empty() {
        objects
    } else {
        objects
            .into_iter()
            .filter(|obj| {
                query.filters.iter().all(|(field, value)| matches(obj, &Filter { field, value: value.as_str() }))
            })
            .collect()
    };

    let order = |a: &T, b: &T| {
        if compare(a, b, query.sort_by) {
            Ordering::Greater
        } else if compare(b, a, query.sort_by) {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    };
    if query.ascending {
        kept.sort_by(|a, b| order(a, b));
    } else {
        kept.sort_by(|a, b| order(b, a));
    }

    let total = kept.len();
    let (start, end) = page_range(query.pagination.as_ref(), total);
    kept.truncate(end);
    kept.drain(..start);
    (kept, total)
}

/// Field selector parsed once per list call.
#[derive(Debug)]
pub struct CompiledFilters {
    selector: Option<Result<FieldSelector, SelectorError>>,
}

impl CompiledFilters {
    pub fn new(query: &Query) -> Self {
        let selector = query.filters.get(&Field::FieldSelector).map(|s| {
            let parsed = FieldSelector::parse(s);
            if let Err(e) = &parsed {
                debug!(error = %e, selector = %s, "search: bad field selector; matching nothing");
                counter!("list_selector_errors_total", 1u64);
            }
            parsed
        });
        Self { selector }
    }

    pub fn matches<T: Queryable>(&self, obj: &T, filter: &Filter<'_>) -> bool {
        match filter.field {
            Field::FieldSelector => match (&self.selector, obj.tree()) {
                (Some(Ok(sel)), Some(tree)) => sel.matches(&tree),
                _ => false,
            },
            field => match obj.accessor() {
                Ok(meta) => meta_filter(&meta, field, filter.value),
                Err(_) => false,
            },
        }
    }
}

/// Default ordering over metadata; objects without a metadata envelope
/// never outrank anything.
pub fn default_compare<T: MetadataAccessor>(left: &T, right: &T, sort_by: SortField) -> bool {
    match (left.accessor(), right.accessor()) {
        (Ok(l), Ok(r)) => compare_meta(&l, &r, sort_by),
        _ => false,
    }
}

/// Default list pipeline. Objects lacking the metadata envelope are dropped
/// up front and counted.
pub fn list_objects<T: Queryable>(objects: Vec<T>, query: &Query) -> (Vec<T>, usize) {
    let t0 = Instant::now();
    let before = objects.len();
    let conforming: Vec<T> = objects
        .into_iter()
        .filter(|obj| match obj.accessor() {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "search: excluding object");
                counter!("list_accessor_failures_total", 1u64);
                false
            }
        })
        .collect();
    let compiled = CompiledFilters::new(query);
    let (page, total) = list_with(conforming, query, default_compare::<T>, |obj, f| compiled.matches(obj, f));
    counter!("list_filtered_out_total", (before - total) as u64);
    histogram!("list_eval_ms", t0.elapsed().as_secs_f64() * 1000.0);
    debug!(before, total, returned = page.len(), "search: list evaluated");
    (page, total)
}
