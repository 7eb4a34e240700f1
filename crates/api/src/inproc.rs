use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use kapis_core::{apply_merge_patch, GroupVersionResource, Registry, ResourceObject, WatchEvent};
use kapis_kubehub::{ListOptions, MergeFrom, ObjectKey, ObjectStore, StreamHandle};
use kapis_search::{list_objects, Query};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, info};

use crate::{ApiError, ApiResult, ListResult, Materializer, ResourceApi};

/// Façade over any [`ObjectStore`]. Holds no per-request state; the registry
/// is shared read-only.
pub struct InProcApi<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    registry: Arc<Registry>,
}

impl<S: ObjectStore + ?Sized> Clone for InProcApi<S> {
    fn clone(&self) -> Self { Self { store: self.store.clone(), registry: self.registry.clone() } }
}

impl<S: ObjectStore + ?Sized> InProcApi<S> {
    pub fn new(store: Arc<S>, registry: Arc<Registry>) -> Self { Self { store, registry } }

    pub fn store(&self) -> &S { &self.store }

    fn materializer(&self) -> Materializer<'_, S> { Materializer::new(&*self.store) }

    /// Fetch `namespace/name` into a fresh container for `gvr`.
    async fn fetch(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> ApiResult<ResourceObject> {
        let mut obj = self.materializer().object_for(gvr).await?;
        self.store.get(&ObjectKey::new(namespace, name), &mut obj).await?;
        Ok(obj)
    }

    /// Decode a request body for `gvr`, reconciling it with the path.
    async fn decode(
        &self,
        gvr: &GroupVersionResource,
        namespace: &str,
        name: Option<&str>,
        body: Value,
    ) -> ApiResult<ResourceObject> {
        let mut obj = self.materializer().object_for(gvr).await?;
        obj.load(body)?;
        reconcile_path(&mut obj, namespace, name)?;
        Ok(obj)
    }
}

/// An empty body namespace or name takes the path's; a different one is rejected.
fn reconcile_path(obj: &mut ResourceObject, namespace: &str, name: Option<&str>) -> ApiResult<()> {
    if !namespace.is_empty() {
        match obj.namespace() {
            "" => obj.meta_mut().namespace = Some(namespace.to_string()),
            ns if ns != namespace => {
                return Err(ApiError::Validation(format!(
                    "namespace {:?} in body does not match {:?} in path",
                    ns, namespace
                )))
            }
            _ => {}
        }
    }
    if let Some(name) = name {
        match obj.name() {
            "" => obj.meta_mut().name = Some(name.to_string()),
            n if n != name => {
                return Err(ApiError::Validation(format!("name {:?} in body does not match {:?} in path", n, name)))
            }
            _ => {}
        }
    }
    if obj.name().is_empty() {
        return Err(ApiError::Validation("metadata.name is required".into()));
    }
    Ok(())
}

fn done(op: &'static str, gvr: &GroupVersionResource, namespace: &str, t0: Instant) {
    counter!("api_requests_total", 1u64, "op" => op);
    info!(op, gvr = %gvr, ns = %namespace, took_ms = %t0.elapsed().as_millis(), "api: request served");
}

#[async_trait]
impl<S: ObjectStore + ?Sized + 'static> ResourceApi for InProcApi<S> {
    fn resource(&self, name: &str) -> ApiResult<GroupVersionResource> { Ok(self.registry.lookup(name)?.clone()) }

    async fn create(&self, gvr: &GroupVersionResource, namespace: &str, body: Value) -> ApiResult<ResourceObject> {
        let t0 = Instant::now();
        let mut obj = self.decode(gvr, namespace, None, body).await?;
        self.store.create(&mut obj).await?;
        done("create", gvr, namespace, t0);
        Ok(obj)
    }

    async fn get(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> ApiResult<ResourceObject> {
        let t0 = Instant::now();
        let obj = self.fetch(gvr, namespace, name).await?;
        done("get", gvr, namespace, t0);
        Ok(obj)
    }

    async fn list(&self, gvr: &GroupVersionResource, namespace: &str, query: &Query) -> ApiResult<ListResult> {
        let t0 = Instant::now();
        let mut list = self.materializer().list_for(gvr).await?;
        let opts = ListOptions::in_namespace(namespace).labels(query.label_selector.clone());
        self.store.list(&mut list, &opts).await?;
        let fetched = list.items.len();
        let (items, total_items) = list_objects(list.into_items(), query);
        debug!(gvr = %gvr, fetched, total_items, returned = items.len(), "api: list");
        done("list", gvr, namespace, t0);
        Ok(ListResult { total_items, items })
    }

    async fn update(
        &self,
        gvr: &GroupVersionResource,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> ApiResult<ResourceObject> {
        let t0 = Instant::now();
        let current = self.fetch(gvr, namespace, name).await?;
        let mut obj = self.decode(gvr, namespace, Some(name), body).await?;
        obj.meta_mut().resource_version = current.meta().resource_version.clone();
        self.store.update(&mut obj).await?;
        done("update", gvr, namespace, t0);
        Ok(obj)
    }

    async fn patch(
        &self,
        gvr: &GroupVersionResource,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> ApiResult<ResourceObject> {
        let t0 = Instant::now();
        if !body.is_object() {
            return Err(ApiError::Validation("merge patch must be a JSON mapping".into()));
        }
        let current = self.fetch(gvr, namespace, name).await?;
        let mut merged = current.to_value()?;
        apply_merge_patch(&mut merged, &body);
        let mut obj = self.decode(gvr, namespace, Some(name), merged).await?;
        self.store.patch(&mut obj, MergeFrom::new(&current)).await?;
        done("patch", gvr, namespace, t0);
        Ok(obj)
    }

    async fn delete(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> ApiResult<()> {
        let t0 = Instant::now();
        let obj = self.fetch(gvr, namespace, name).await?;
        self.store.delete(&obj).await?;
        done("delete", gvr, namespace, t0);
        Ok(())
    }

    async fn watch(
        &self,
        gvr: &GroupVersionResource,
        namespace: &str,
        label_selector: Option<String>,
    ) -> ApiResult<StreamHandle<WatchEvent>> {
        let t0 = Instant::now();
        let list = self.materializer().list_for(gvr).await?;
        let opts = ListOptions::in_namespace(namespace).labels(label_selector);
        let handle = self.store.watch(&list, &opts).await?;
        done("watch", gvr, namespace, t0);
        Ok(handle)
    }
}
