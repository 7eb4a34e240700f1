//! Resource to kind resolution and empty container construction.

use kapis_core::{GroupVersionKind, GroupVersionResource, ResourceList, ResourceObject};
use kapis_kubehub::ObjectStore;
use tracing::debug;

use crate::ApiResult;

/// Builds containers from the store's mapper and scheme. Stateless.
pub struct Materializer<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ObjectStore + ?Sized> Materializer<'a, S> {
    pub fn new(store: &'a S) -> Self { Self { store } }

    pub async fn resolve(&self, gvr: &GroupVersionResource) -> ApiResult<GroupVersionKind> {
        Ok(self.store.kind_for(gvr).await?)
    }

    /// Typed when the scheme recognizes `gvk`, generic otherwise.
    pub fn instantiate(&self, gvk: &GroupVersionKind) -> ResourceObject {
        let item = gvk.to_item();
        match self.store.new_object(&item) {
            Some(obj) if self.store.recognizes(&item) => obj,
            _ => {
                debug!(gvk = %item, "materialize: generic container");
                ResourceObject::generic(&item)
            }
        }
    }

    /// Collection container for `gvk` (element or list kind).
    pub fn instantiate_list(&self, gvk: &GroupVersionKind) -> ResourceList {
        ResourceList::new(self.instantiate(gvk))
    }

    pub async fn object_for(&self, gvr: &GroupVersionResource) -> ApiResult<ResourceObject> {
        Ok(self.instantiate(&self.resolve(gvr).await?))
    }

    pub async fn list_for(&self, gvr: &GroupVersionResource) -> ApiResult<ResourceList> {
        Ok(self.instantiate_list(&self.resolve(gvr).await?))
    }
}
