//! Object store backed by a live cluster.

use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use kapis_core::{
    EventType, GroupVersionKind, GroupVersionResource, Registry, ResourceList, ResourceObject, Scheme, WatchEvent,
};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchEvent as KubeWatchEvent, WatchParams};
use kube::core::{ApiResource, DynamicObject};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use metrics::counter;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    watch_queue_cap, CancelHandle, ListOptions, MergeFrom, ObjectKey, ObjectStore, StoreError, StoreResult,
    StreamHandle,
};

/// Resource to kind mapping seeded from the registry; misses fall back to
/// API discovery and are remembered.
#[derive(Debug, Default)]
struct RestMapper {
    kinds: RwLock<FxHashMap<GroupVersionResource, GroupVersionKind>>,
    resources: RwLock<FxHashMap<GroupVersionKind, ApiResource>>,
}

impl RestMapper {
    fn from_registry(registry: &Registry) -> Self {
        let mapper = Self::default();
        for entry in registry.entries() {
            if let Some(kind) = &entry.kind {
                mapper.remember(&entry.gvr, kind);
            }
        }
        mapper
    }

    fn remember(&self, gvr: &GroupVersionResource, gvk: &GroupVersionKind) {
        let kube_gvk: kube::core::GroupVersionKind = gvk.into();
        let ar = ApiResource::from_gvk_with_plural(&kube_gvk, &gvr.resource);
        if let Ok(mut kinds) = self.kinds.write() {
            kinds.insert(gvr.clone(), gvk.clone());
        }
        if let Ok(mut resources) = self.resources.write() {
            resources.insert(gvk.clone(), ar);
        }
    }

    fn kind(&self, gvr: &GroupVersionResource) -> Option<GroupVersionKind> {
        self.kinds.read().ok().and_then(|k| k.get(gvr).cloned())
    }

    fn resource(&self, gvk: &GroupVersionKind) -> Option<ApiResource> {
        self.resources.read().ok().and_then(|r| r.get(gvk).cloned())
    }
}

pub struct KubeStore {
    client: Client,
    scheme: Scheme,
    mapper: RestMapper,
}

impl KubeStore {
    pub fn new(client: Client, registry: &Registry) -> Self {
        Self { client, scheme: Scheme::from_registry(registry), mapper: RestMapper::from_registry(registry) }
    }

    /// Connect with the ambient kubeconfig or in-cluster credentials.
    pub async fn try_default(registry: &Registry) -> StoreResult<Self> {
        let client = Client::try_default().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self::new(client, registry))
    }

    async fn discover_group(&self, group: &str, version: &str) -> StoreResult<()> {
        let t0 = Instant::now();
        let discovery = Discovery::new(self.client.clone())
            .filter(&[group])
            .run()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for api_group in discovery.groups() {
            for (ar, caps) in api_group.versioned_resources(version) {
                // Subresources are not addressable objects.
                if ar.plural.contains('/') {
                    continue;
                }
                let gvr = GroupVersionResource::new(&ar.group, &ar.version, &ar.plural);
                let gvk = GroupVersionKind::new(&ar.group, &ar.version, &ar.kind);
                debug!(gvr = %gvr, gvk = %gvk, namespaced = matches!(caps.scope, Scope::Namespaced), "discovered");
                self.mapper.remember(&gvr, &gvk);
            }
        }
        info!(group = %group, version = %version, took_ms = %t0.elapsed().as_millis(), "kube: discovery ok");
        Ok(())
    }

    async fn api_resource(&self, gvk: &GroupVersionKind) -> StoreResult<ApiResource> {
        if let Some(ar) = self.mapper.resource(gvk) {
            return Ok(ar);
        }
        self.discover_group(&gvk.group, &gvk.version).await?;
        self.mapper.resource(gvk).ok_or_else(|| StoreError::KindNotSupported(gvk.to_string()))
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: &str) -> StoreResult<Api<DynamicObject>> {
        let ar = self.api_resource(gvk).await?;
        Ok(if namespace.is_empty() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        })
    }
}

fn map_kube_err(err: kube::Error, what: &str) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(format!("{}: {}", what, ae.message)),
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(format!("{}: {}", what, ae.message)),
        kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => {
            StoreError::Invalid(format!("{}: {}", what, ae.message))
        }
        other => StoreError::Backend(format!("{}: {}", what, other)),
    }
}

fn to_dynamic(obj: &ResourceObject) -> StoreResult<DynamicObject> {
    serde_json::from_value(obj.to_value()?).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn to_value(obj: &DynamicObject) -> StoreResult<Value> {
    serde_json::to_value(obj).map_err(|e| StoreError::Backend(e.to_string()))
}

fn refresh(obj: &mut ResourceObject, from: &DynamicObject) -> StoreResult<()> {
    obj.load(to_value(from)?)?;
    Ok(())
}

fn convert_event(ev: KubeWatchEvent<DynamicObject>, prototype: &ResourceObject) -> Option<WatchEvent> {
    let (event_type, raw) = match ev {
        KubeWatchEvent::Added(o) => (EventType::Added, o),
        KubeWatchEvent::Modified(o) => (EventType::Modified, o),
        KubeWatchEvent::Deleted(o) => (EventType::Deleted, o),
        KubeWatchEvent::Bookmark(_) => return None,
        KubeWatchEvent::Error(e) => return Some(WatchEvent::error(e.code, &e.reason, &e.message)),
    };
    let mut object = prototype.empty_like();
    match to_value(&raw).and_then(|v| object.load(v).map_err(StoreError::from)) {
        Ok(()) => Some(WatchEvent::new(event_type, object)),
        Err(e) => {
            warn!(error = %e, "kube: undecodable watch object");
            None
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn kind_for(&self, gvr: &GroupVersionResource) -> StoreResult<GroupVersionKind> {
        if let Some(gvk) = self.mapper.kind(gvr) {
            return Ok(gvk);
        }
        self.discover_group(&gvr.group, &gvr.version).await?;
        self.mapper.kind(gvr).ok_or_else(|| StoreError::KindNotSupported(gvr.to_string()))
    }

    fn recognizes(&self, gvk: &GroupVersionKind) -> bool { self.scheme.recognizes(gvk) }

    fn new_object(&self, gvk: &GroupVersionKind) -> Option<ResourceObject> { self.scheme.new_object(gvk) }

    async fn get(&self, key: &ObjectKey, obj: &mut ResourceObject) -> StoreResult<()> {
        let api = self.api(&obj.gvk(), &key.namespace).await?;
        let found = api.get(&key.name).await.map_err(|e| map_kube_err(e, &key.name))?;
        refresh(obj, &found)
    }

    async fn list(&self, list: &mut ResourceList, opts: &ListOptions) -> StoreResult<()> {
        let t0 = Instant::now();
        let gvk = list.item_gvk();
        let api = self.api(&gvk, opts.namespace()).await?;
        let mut lp = ListParams::default();
        if let Some(labels) = opts.label_selector.as_deref() {
            lp = lp.labels(labels);
        }
        if let Some(fields) = opts.field_selector.as_deref() {
            lp = lp.fields(fields);
        }
        let found = api.list(&lp).await.map_err(|e| map_kube_err(e, &gvk.kind))?;
        list.items.clear();
        for item in &found.items {
            list.push_value(to_value(item)?)?;
        }
        list.resource_version = found.metadata.resource_version.clone();
        info!(gvk = %gvk, count = list.items.len(), took_ms = %t0.elapsed().as_millis(), "kube: list ok");
        Ok(())
    }

    async fn create(&self, obj: &mut ResourceObject) -> StoreResult<()> {
        let api = self.api(&obj.gvk(), obj.namespace()).await?;
        let created = api.create(&PostParams::default(), &to_dynamic(obj)?).await.map_err(|e| map_kube_err(e, obj.name()))?;
        refresh(obj, &created)
    }

    async fn update(&self, obj: &mut ResourceObject) -> StoreResult<()> {
        let api = self.api(&obj.gvk(), obj.namespace()).await?;
        let replaced = api
            .replace(obj.name(), &PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_kube_err(e, obj.name()))?;
        refresh(obj, &replaced)
    }

    async fn patch(&self, obj: &mut ResourceObject, patch: MergeFrom<'_>) -> StoreResult<()> {
        let doc = patch.patch_for(obj)?;
        let api = self.api(&obj.gvk(), obj.namespace()).await?;
        let patched = api
            .patch(obj.name(), &PatchParams::default(), &Patch::Merge(&doc))
            .await
            .map_err(|e| map_kube_err(e, obj.name()))?;
        refresh(obj, &patched)
    }

    async fn delete(&self, obj: &ResourceObject) -> StoreResult<()> {
        let api = self.api(&obj.gvk(), obj.namespace()).await?;
        api.delete(obj.name(), &DeleteParams::default()).await.map_err(|e| map_kube_err(e, obj.name()))?;
        Ok(())
    }

    async fn watch(&self, list: &ResourceList, opts: &ListOptions) -> StoreResult<StreamHandle<WatchEvent>> {
        let gvk = list.item_gvk();
        let api = self.api(&gvk, opts.namespace()).await?;
        let mut wp = WatchParams::default();
        if let Some(labels) = opts.label_selector.as_deref() {
            wp = wp.labels(labels);
        }
        if let Some(fields) = opts.field_selector.as_deref() {
            wp = wp.fields(fields);
        }
        let stream = api.watch(&wp, "0").await.map_err(|e| map_kube_err(e, &gvk.kind))?;
        let prototype = list.new_item();
        let (tx, rx) = mpsc::channel(watch_queue_cap());
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        info!(gvk = %gvk, ns = %opts.namespace(), "kube: watch started");

        tokio::spawn(async move {
            let mut stream = stream.boxed();
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    next = stream.next() => match next {
                        Some(Ok(ev)) => {
                            let Some(ev) = convert_event(ev, &prototype) else { continue };
                            if tx.send(ev).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, gvk = %gvk, "kube: watch stream error");
                            counter!("kube_watch_errors_total", 1u64);
                            break;
                        }
                        None => break,
                    }
                }
            }
            debug!(gvk = %gvk, "kube: watch producer stopped");
        });

        Ok(StreamHandle::new(rx, CancelHandle::from_sender(stop_tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "boom".into(), reason: "x".into(), code })
    }

    #[test]
    fn api_errors_map_to_store_errors() {
        assert!(matches!(map_kube_err(api_err(404), "p"), StoreError::NotFound(_)));
        assert!(matches!(map_kube_err(api_err(409), "p"), StoreError::Conflict(_)));
        assert!(matches!(map_kube_err(api_err(422), "p"), StoreError::Invalid(_)));
        assert!(matches!(map_kube_err(api_err(500), "p"), StoreError::Backend(_)));
    }

    #[test]
    fn mapper_seeds_from_registry() {
        let mapper = RestMapper::from_registry(&Registry::builtin());
        let gvk = mapper.kind(&GroupVersionResource::new("apps", "v1", "deployments")).expect("deployments");
        assert_eq!(gvk.kind, "Deployment");
        let ar = mapper.resource(&gvk).expect("api resource");
        assert_eq!(ar.plural, "deployments");
        assert!(mapper.kind(&GroupVersionResource::new("x.io", "v1", "widgets")).is_none());
    }

    #[test]
    fn error_events_carry_status() {
        let proto = ResourceObject::generic(&GroupVersionKind::new("", "v1", "Pod"));
        let status = ErrorResponse { status: "Failure".into(), message: "gone".into(), reason: "Expired".into(), code: 410 };
        let ev = convert_event(KubeWatchEvent::Error(status), &proto).expect("error event");
        assert_eq!(ev.event_type, EventType::Error);
        assert_eq!(ev.object.gvk().kind, "Status");
    }
}
