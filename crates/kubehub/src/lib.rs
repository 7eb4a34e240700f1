//! kapis kubehub: the object store seam and its implementations.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use kapis_core::{
    merge_patch, CoreError, GroupVersionKind, GroupVersionResource, ResourceList, ResourceObject, WatchEvent,
};
use serde_json::Value;
use thiserror::Error;

pub mod kube_store;
pub mod memory;
mod selector;
mod stream;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;
pub use stream::{CancelHandle, StreamHandle};

/// Address of one object. An empty namespace means cluster scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn of(obj: &ResourceObject) -> Self { Self::new(obj.namespace(), obj.name()) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// `None` or empty lists across all namespaces.
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: &str) -> Self {
        Self { namespace: (!namespace.is_empty()).then(|| namespace.to_string()), ..Default::default() }
    }

    pub fn labels(mut self, selector: Option<String>) -> Self {
        self.label_selector = selector.filter(|s| !s.is_empty());
        self
    }

    pub(crate) fn namespace(&self) -> &str { self.namespace.as_deref().unwrap_or("") }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("kind not supported: {0}")]
    KindNotSupported(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("backend: {0}")]
    Backend(String),
}

impl From<CoreError> for StoreError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnsupportedResource(r) => StoreError::KindNotSupported(r),
            other => StoreError::Invalid(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Merge-patch base: the patch sent is the diff from `base` to the new object.
#[derive(Debug, Clone, Copy)]
pub struct MergeFrom<'a> {
    base: &'a ResourceObject,
}

impl<'a> MergeFrom<'a> {
    pub fn new(base: &'a ResourceObject) -> Self { Self { base } }

    pub fn patch_for(&self, obj: &ResourceObject) -> StoreResult<Value> {
        Ok(merge_patch(&self.base.to_value()?, &obj.to_value()?))
    }
}

/// Cluster object access. Mutating calls refresh `obj` with the stored state.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Map a resource to its kind.
    async fn kind_for(&self, gvr: &GroupVersionResource) -> StoreResult<GroupVersionKind>;
    fn recognizes(&self, gvk: &GroupVersionKind) -> bool;
    /// Typed container for a recognized element kind.
    fn new_object(&self, gvk: &GroupVersionKind) -> Option<ResourceObject>;

    async fn get(&self, key: &ObjectKey, obj: &mut ResourceObject) -> StoreResult<()>;
    async fn list(&self, list: &mut ResourceList, opts: &ListOptions) -> StoreResult<()>;
    async fn create(&self, obj: &mut ResourceObject) -> StoreResult<()>;
    async fn update(&self, obj: &mut ResourceObject) -> StoreResult<()>;
    async fn patch(&self, obj: &mut ResourceObject, patch: MergeFrom<'_>) -> StoreResult<()>;
    async fn delete(&self, obj: &ResourceObject) -> StoreResult<()>;
    async fn watch(&self, list: &ResourceList, opts: &ListOptions) -> StoreResult<StreamHandle<WatchEvent>>;
}

/// Watch channel capacity (`KAPIS_WATCH_QUEUE_CAP`, default 256).
pub fn watch_queue_cap() -> usize {
    std::env::var("KAPIS_WATCH_QUEUE_CAP").ok().and_then(|s| s.parse().ok()).filter(|&n| n > 0).unwrap_or(256)
}
