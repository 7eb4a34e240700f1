//! kapis resource façade (in-process).
//!
//! The contract an HTTP layer calls: create, get, list, update, patch,
//! delete and watch, keyed by group/version/resource. Objects are typed when
//! the store's scheme knows the kind and generic otherwise.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use kapis_core::{CoreError, GroupVersionResource, ResourceObject, WatchEvent};
use kapis_kubehub::{StoreError, StreamHandle};
use kapis_search::Query;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod bridge;
mod inproc;
pub mod materializer;

pub use bridge::{stream_events, stream_events_with, StreamEnd, SSE_HEADERS};
pub use inproc::InProcApi;
pub use materializer::Materializer;

/// Façade errors, mapped onto HTTP status codes by the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApiError {
    #[error("kind_not_supported: {0}")]
    KindNotSupported(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::KindNotSupported(_) | ApiError::Validation(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => ApiError::NotFound(m),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            StoreError::KindNotSupported(m) => ApiError::KindNotSupported(m),
            StoreError::Invalid(m) => ApiError::Validation(m),
            StoreError::Backend(m) => ApiError::Internal(m),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnsupportedResource(r) => ApiError::KindNotSupported(r),
            CoreError::KindMismatch { .. } => ApiError::Validation(e.to_string()),
            CoreError::NotAnObject | CoreError::Decode(_) => ApiError::Validation(e.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// One page of a filtered, sorted listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    /// Items that passed filtering, before paging.
    pub total_items: usize,
    pub items: Vec<ResourceObject>,
}

/// GVR-keyed resource operations. An empty namespace addresses
/// cluster-scoped objects (or all namespaces for list and watch).
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Resolve a short resource name (`pods`) through the registry.
    fn resource(&self, name: &str) -> ApiResult<GroupVersionResource>;

    async fn create(&self, gvr: &GroupVersionResource, namespace: &str, body: Value) -> ApiResult<ResourceObject>;

    async fn get(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> ApiResult<ResourceObject>;

    async fn list(&self, gvr: &GroupVersionResource, namespace: &str, query: &Query) -> ApiResult<ListResult>;

    /// Replace an object, carrying over the stored resource version.
    async fn update(
        &self,
        gvr: &GroupVersionResource,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> ApiResult<ResourceObject>;

    /// Merge `body` into the stored object.
    async fn patch(
        &self,
        gvr: &GroupVersionResource,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> ApiResult<ResourceObject>;

    async fn delete(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> ApiResult<()>;

    async fn watch(
        &self,
        gvr: &GroupVersionResource,
        namespace: &str,
        label_selector: Option<String>,
    ) -> ApiResult<StreamHandle<WatchEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::KindNotSupported("x".into()).status_code(), 400);
        assert_eq!(ApiError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), 409);
        assert_eq!(ApiError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn store_errors_map_through() {
        assert_eq!(ApiError::from(StoreError::Invalid("bad".into())), ApiError::Validation("bad".into()));
        assert_eq!(ApiError::from(StoreError::Backend("io".into())), ApiError::Internal("io".into()));
    }

    #[test]
    fn errors_serialize_for_transport() {
        let v = serde_json::to_value(ApiError::NotFound("pod web".into())).expect("json");
        assert_eq!(v["NotFound"], "pod web");
    }
}
