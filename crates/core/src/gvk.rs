//! Resource and kind identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix carried by every collection kind (`PodList`, `GuestbookList`).
pub const LIST_SUFFIX: &str = "List";

/// Addressable collection of a cluster API (`apps/v1/deployments`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    pub fn api_version(&self) -> String { join_api_version(&self.group, &self.version) }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// Schema identity of an object. A kind ending in `List` names a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Build from an `apiVersion` string (`v1`, `apps/v1`) and a kind.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", api_version),
        };
        Self::new(group, version, kind)
    }

    pub fn api_version(&self) -> String { join_api_version(&self.group, &self.version) }

    pub fn is_list(&self) -> bool { self.kind.ends_with(LIST_SUFFIX) }

    /// Collection kind for this kind. Idempotent on kinds that already end in `List`.
    pub fn to_list(&self) -> Self {
        if self.is_list() {
            return self.clone();
        }
        Self::new(self.group.clone(), self.version.clone(), format!("{}{}", self.kind, LIST_SUFFIX))
    }

    /// Element kind for a collection kind; other kinds are returned as-is.
    pub fn to_item(&self) -> Self {
        match self.kind.strip_suffix(LIST_SUFFIX) {
            Some(item) if !item.is_empty() => Self::new(self.group.clone(), self.version.clone(), item),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

impl From<&GroupVersionKind> for kube::core::GroupVersionKind {
    fn from(gvk: &GroupVersionKind) -> Self { kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind) }
}

fn join_api_version(group: &str, version: &str) -> String {
    if group.is_empty() { version.to_string() } else { format!("{}/{}", group, version) }
}
