//! kapis core: resource identities, object containers, metadata access, the
//! supported-resource registry and the typed scheme.

#![forbid(unsafe_code)]

use thiserror::Error;

pub mod gvk;
pub mod meta;
pub mod object;
pub mod patch;
pub mod registry;
pub mod scheme;
pub mod watch;

pub use gvk::{GroupVersionKind, GroupVersionResource, LIST_SUFFIX};
pub use meta::{AccessorError, MetaView, MetadataAccessor};
pub use object::{ResourceList, ResourceObject, TypedResource};
pub use patch::{apply_merge_patch, merge_patch};
pub use registry::{Constructor, Registry, RegistryEntry};
pub use scheme::Scheme;
pub use watch::{EventType, WatchEvent};

pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
pub use kube::core::DynamicObject;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported resource type: {0}")]
    UnsupportedResource(String),
    #[error("wrong resource GroupVersionKind: expected {expected}, got {found}")]
    KindMismatch { expected: String, found: String },
    #[error("object is not a JSON mapping")]
    NotAnObject,
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

pub mod prelude {
    pub use super::{
        CoreError, EventType, GroupVersionKind, GroupVersionResource, MetaView, MetadataAccessor, Registry,
        ResourceList, ResourceObject, Result, Scheme, TypedResource, WatchEvent,
    };
}
