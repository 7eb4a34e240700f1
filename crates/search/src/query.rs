//! List query parameters and their query-string form.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const PARAM_PAGE: &str = "page";
pub const PARAM_LIMIT: &str = "limit";
pub const PARAM_ASCENDING: &str = "ascending";
pub const PARAM_ORDER_BY: &str = "orderBy";
pub const PARAM_SORT_BY: &str = "sortBy";
pub const PARAM_LABEL_SELECTOR: &str = "labelSelector";

/// Filter key. Unrecognized keys are kept and never match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Names,
    Name,
    Uid,
    Namespace,
    OwnerReference,
    OwnerKind,
    Label,
    Annotation,
    FieldSelector,
    Other(String),
}

impl Field {
    pub fn parse(s: &str) -> Self {
        match s {
            "names" => Field::Names,
            "name" => Field::Name,
            "uid" => Field::Uid,
            "namespace" => Field::Namespace,
            "ownerReference" => Field::OwnerReference,
            "ownerKind" => Field::OwnerKind,
            "label" => Field::Label,
            "annotation" => Field::Annotation,
            "fieldSelector" => Field::FieldSelector,
            other => Field::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Field::Names => "names",
            Field::Name => "name",
            Field::Uid => "uid",
            Field::Namespace => "namespace",
            Field::OwnerReference => "ownerReference",
            Field::OwnerKind => "ownerKind",
            Field::Label => "label",
            Field::Annotation => "annotation",
            Field::FieldSelector => "fieldSelector",
            Field::Other(s) => s,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Name,
    #[default]
    CreateTime,
}

impl SortField {
    /// `name` sorts by name; anything else sorts by creation time.
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => SortField::Name,
            _ => SortField::CreateTime,
        }
    }
}

/// 1-based page of `limit` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn new(page: usize, limit: usize) -> Self { Self { page, limit } }

    /// Page 0 is treated as page 1.
    pub fn offset(&self) -> usize { self.page.saturating_sub(1).saturating_mul(self.limit) }

    /// Slice bounds within `total` items, clamped.
    pub fn range(&self, total: usize) -> (usize, usize) {
        let start = self.offset().min(total);
        let end = start.saturating_add(self.limit).min(total);
        (start, end)
    }
}

/// Filters, ordering and paging for a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: BTreeMap<Field, String>,
    pub sort_by: SortField,
    pub ascending: bool,
    /// `None` returns every matching item.
    pub pagination: Option<Pagination>,
    /// Passed through to the store.
    pub label_selector: Option<String>,
}

impl Query {
    pub fn new() -> Self { Self::default() }

    pub fn filter(mut self, field: Field, value: impl Into<String>) -> Self {
        self.filters.insert(field, value.into());
        self
    }

    pub fn sort(mut self, sort_by: SortField, ascending: bool) -> Self {
        self.sort_by = sort_by;
        self.ascending = ascending;
        self
    }

    pub fn paginate(mut self, page: usize, limit: usize) -> Self {
        self.pagination = Some(Pagination::new(page, limit));
        self
    }

    pub fn label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Build from decoded key/value pairs. The first value of a repeated key
    /// wins. A missing or non-numeric `limit` disables pagination.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut first: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in pairs {
            first.entry(k.as_ref().to_string()).or_insert_with(|| v.as_ref().to_string());
        }

        let mut q = Query::new();
        let limit = first.remove(PARAM_LIMIT).and_then(|l| l.trim().parse::<usize>().ok());
        let page = first.remove(PARAM_PAGE).and_then(|p| p.trim().parse::<usize>().ok()).unwrap_or(1);
        q.pagination = limit.map(|limit| Pagination::new(page, limit));
        q.ascending = first.remove(PARAM_ASCENDING).is_some_and(|a| parse_bool(&a));
        let order_by = first.remove(PARAM_ORDER_BY);
        let sort_by = first.remove(PARAM_SORT_BY);
        q.sort_by = order_by.or(sort_by).map(|s| SortField::parse(&s)).unwrap_or_default();
        q.label_selector = first.remove(PARAM_LABEL_SELECTOR).filter(|s| !s.is_empty());
        for (k, v) in first {
            q.filters.insert(Field::parse(&k), v);
        }
        q
    }

    /// Parse a URL query string (`name=web&limit=10&page=2`).
    pub fn from_query_str(qs: &str) -> Self {
        let qs = qs.strip_prefix('?').unwrap_or(qs);
        Self::from_pairs(url::form_urlencoded::parse(qs.as_bytes()))
    }
}

fn parse_bool(s: &str) -> bool { matches!(s.trim(), "1" | "t" | "T" | "true" | "TRUE" | "True") }
