//! In-process object store for demos and tests.
//!
//! Objects are kept as JSON trees keyed by kind, namespace and name. Writes
//! stamp `uid`, `creationTimestamp` and `resourceVersion` the way an API
//! server does and fan out to watchers through a broadcast channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kapis_core::{
    apply_merge_patch, EventType, GroupVersionKind, GroupVersionResource, Registry, ResourceList, ResourceObject,
    Scheme, WatchEvent,
};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::selector::{matches_all, parse_label_selector, LabelRequirement};
use crate::{
    watch_queue_cap, CancelHandle, ListOptions, MergeFrom, ObjectKey, ObjectStore, StoreError, StoreResult,
    StreamHandle,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ItemKey {
    gvk: GroupVersionKind,
    namespace: String,
    name: String,
}

impl ItemKey {
    fn new(gvk: GroupVersionKind, key: &ObjectKey) -> Self {
        Self { gvk, namespace: key.namespace.clone(), name: key.name.clone() }
    }
}

#[derive(Debug, Clone)]
struct Change {
    key: ItemKey,
    event_type: EventType,
    value: Value,
}

type ItemMap = BTreeMap<ItemKey, Value>;

pub struct MemoryStore {
    scheme: Scheme,
    kinds: FxHashMap<GroupVersionResource, GroupVersionKind>,
    items: RwLock<ItemMap>,
    revision: AtomicU64,
    changes: broadcast::Sender<Change>,
    active_watches: Arc<AtomicUsize>,
    stopped_watches: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Store serving every registry entry with a known kind.
    pub fn new(registry: &Registry) -> Self {
        let kinds = registry.entries().filter_map(|e| e.kind.clone().map(|k| (e.gvr.clone(), k))).collect();
        let (changes, _) = broadcast::channel(1024);
        Self {
            scheme: Scheme::from_registry(registry),
            kinds,
            items: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            changes,
            active_watches: Arc::new(AtomicUsize::new(0)),
            stopped_watches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Map an extra resource to a kind; its objects are served generic.
    pub fn with_kind(mut self, gvr: GroupVersionResource, gvk: GroupVersionKind) -> Self {
        self.kinds.insert(gvr, gvk);
        self
    }

    /// Watch producers currently running.
    pub fn active_watches(&self) -> usize { self.active_watches.load(Ordering::SeqCst) }

    /// Watches whose stop handle has fired.
    pub fn stopped_watches(&self) -> usize { self.stopped_watches.load(Ordering::SeqCst) }

    pub fn len(&self) -> usize { self.items.read().map(|m| m.len()).unwrap_or(0) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn next_revision(&self) -> String { (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string() }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, ItemMap>> {
        self.items.read().map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, ItemMap>> {
        self.items.write().map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    /// Called with the write guard held so events follow resourceVersion order.
    fn publish(&self, key: ItemKey, event_type: EventType, value: Value) {
        // No receivers is fine.
        let _ = self.changes.send(Change { key, event_type, value });
    }

    fn key_of(obj: &ResourceObject) -> StoreResult<ItemKey> {
        if obj.name().is_empty() {
            return Err(StoreError::Invalid("metadata.name is required".into()));
        }
        Ok(ItemKey::new(obj.gvk(), &ObjectKey::of(obj)))
    }
}

fn describe(key: &ItemKey) -> String {
    if key.namespace.is_empty() {
        format!("{} {}", key.gvk.kind, key.name)
    } else {
        format!("{} {}/{}", key.gvk.kind, key.namespace, key.name)
    }
}

fn meta_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get("metadata").and_then(|m| m.get(field)).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn set_meta(value: &mut Value, field: &str, v: Value) {
    if let Some(meta) = value.as_object_mut().map(|m| m.entry("metadata").or_insert_with(|| Value::Object(Default::default()))) {
        if let Some(meta) = meta.as_object_mut() {
            meta.insert(field.to_string(), v);
        }
    }
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    value
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(Value::as_object)
        .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
        .unwrap_or_default()
}

fn selected(key: &ItemKey, value: &Value, gvk: &GroupVersionKind, namespace: &str, reqs: &[LabelRequirement]) -> bool {
    &key.gvk == gvk
        && (namespace.is_empty() || key.namespace == namespace)
        && (reqs.is_empty() || matches_all(reqs, &labels_of(value)))
}

/// Carry server-owned metadata from the stored object into its replacement.
fn keep_server_fields(next: &mut Value, stored: &Value) {
    for field in ["uid", "creationTimestamp"] {
        if let Some(v) = stored.get("metadata").and_then(|m| m.get(field)) {
            set_meta(next, field, v.clone());
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn kind_for(&self, gvr: &GroupVersionResource) -> StoreResult<GroupVersionKind> {
        self.kinds.get(gvr).cloned().ok_or_else(|| StoreError::KindNotSupported(gvr.to_string()))
    }

    fn recognizes(&self, gvk: &GroupVersionKind) -> bool { self.scheme.recognizes(gvk) }

    fn new_object(&self, gvk: &GroupVersionKind) -> Option<ResourceObject> { self.scheme.new_object(gvk) }

    async fn get(&self, key: &ObjectKey, obj: &mut ResourceObject) -> StoreResult<()> {
        let item = ItemKey::new(obj.gvk(), key);
        let value = self.read()?.get(&item).cloned().ok_or_else(|| StoreError::NotFound(describe(&item)))?;
        obj.load(value)?;
        Ok(())
    }

    async fn list(&self, list: &mut ResourceList, opts: &ListOptions) -> StoreResult<()> {
        let gvk = list.item_gvk();
        let reqs = match opts.label_selector.as_deref() {
            Some(sel) => parse_label_selector(sel)?,
            None => Vec::new(),
        };
        if opts.field_selector.as_deref().is_some_and(|s| !s.is_empty()) {
            return Err(StoreError::Invalid("field selectors are not supported by the memory store".into()));
        }
        let found: Vec<Value> = self
            .read()?
            .iter()
            .filter(|(k, v)| selected(k, v, &gvk, opts.namespace(), &reqs))
            .map(|(_, v)| v.clone())
            .collect();
        list.items.clear();
        for value in found {
            list.push_value(value)?;
        }
        list.resource_version = Some(self.revision.load(Ordering::SeqCst).to_string());
        debug!(gvk = %gvk, count = list.items.len(), "memory: list");
        Ok(())
    }

    async fn create(&self, obj: &mut ResourceObject) -> StoreResult<()> {
        let key = Self::key_of(obj)?;
        let mut value = obj.to_value()?;
        {
            let mut items = self.write()?;
            if items.contains_key(&key) {
                return Err(StoreError::Conflict(format!("{} already exists", describe(&key))));
            }
            if meta_str(&value, "uid").is_none() {
                set_meta(&mut value, "uid", Value::String(Uuid::new_v4().to_string()));
            }
            if meta_str(&value, "creationTimestamp").is_none() {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                set_meta(&mut value, "creationTimestamp", Value::String(now));
            }
            set_meta(&mut value, "resourceVersion", Value::String(self.next_revision()));
            items.insert(key.clone(), value.clone());
            self.publish(key, EventType::Added, value.clone());
        }
        obj.load(value)?;
        Ok(())
    }

    async fn update(&self, obj: &mut ResourceObject) -> StoreResult<()> {
        let key = Self::key_of(obj)?;
        let mut value = obj.to_value()?;
        {
            let mut items = self.write()?;
            let stored = items.get(&key).ok_or_else(|| StoreError::NotFound(describe(&key)))?;
            let stored_rv = meta_str(stored, "resourceVersion").unwrap_or("");
            if let Some(rv) = meta_str(&value, "resourceVersion") {
                if rv != stored_rv {
                    return Err(StoreError::Conflict(format!(
                        "{}: resourceVersion {} is stale (current {})",
                        describe(&key),
                        rv,
                        stored_rv
                    )));
                }
            }
            keep_server_fields(&mut value, stored);
            set_meta(&mut value, "resourceVersion", Value::String(self.next_revision()));
            items.insert(key.clone(), value.clone());
            self.publish(key, EventType::Modified, value.clone());
        }
        obj.load(value)?;
        Ok(())
    }

    async fn patch(&self, obj: &mut ResourceObject, patch: MergeFrom<'_>) -> StoreResult<()> {
        let key = Self::key_of(obj)?;
        let doc = patch.patch_for(obj)?;
        let value = {
            let mut items = self.write()?;
            let stored = items.get(&key).ok_or_else(|| StoreError::NotFound(describe(&key)))?;
            if let Some(rv) = doc.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(Value::as_str) {
                let stored_rv = meta_str(stored, "resourceVersion").unwrap_or("");
                if rv != stored_rv {
                    return Err(StoreError::Conflict(format!("{}: resourceVersion {} is stale", describe(&key), rv)));
                }
            }
            let mut next = stored.clone();
            apply_merge_patch(&mut next, &doc);
            keep_server_fields(&mut next, stored);
            set_meta(&mut next, "resourceVersion", Value::String(self.next_revision()));
            items.insert(key.clone(), next.clone());
            self.publish(key, EventType::Modified, next.clone());
            next
        };
        obj.load(value)?;
        Ok(())
    }

    async fn delete(&self, obj: &ResourceObject) -> StoreResult<()> {
        let key = Self::key_of(obj)?;
        let mut items = self.write()?;
        let removed = items.remove(&key).ok_or_else(|| StoreError::NotFound(describe(&key)))?;
        self.publish(key, EventType::Deleted, removed);
        Ok(())
    }

    async fn watch(&self, list: &ResourceList, opts: &ListOptions) -> StoreResult<StreamHandle<WatchEvent>> {
        let gvk = list.item_gvk();
        let namespace = opts.namespace().to_string();
        let reqs = match opts.label_selector.as_deref() {
            Some(sel) => parse_label_selector(sel)?,
            None => Vec::new(),
        };
        let prototype = list.new_item();
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(watch_queue_cap());
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let active = self.active_watches.clone();
        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    change = changes.recv() => match change {
                        Ok(change) => {
                            if !selected(&change.key, &change.value, &gvk, &namespace, &reqs) {
                                continue;
                            }
                            let mut object = prototype.empty_like();
                            if let Err(e) = object.load(change.value) {
                                warn!(error = %e, gvk = %gvk, "memory: undecodable watch object");
                                continue;
                            }
                            tokio::select! {
                                biased;
                                _ = &mut stop_rx => break,
                                sent = tx.send(WatchEvent::new(change.event_type, object)) => {
                                    if sent.is_err() { break; }
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, gvk = %gvk, "memory: watcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
            debug!(gvk = %gvk, "memory: watch producer stopped");
        });

        let stopped = self.stopped_watches.clone();
        let cancel = CancelHandle::new(move || {
            stopped.fetch_add(1, Ordering::SeqCst);
            let _ = stop_tx.send(());
        });
        Ok(StreamHandle::new(rx, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kapis_core::k8s_openapi::api::core::v1::Pod;
    use kapis_core::ObjectMeta;
    use std::time::Duration;

    fn pod(ns: &str, name: &str, labels: &[(&str, &str)]) -> ResourceObject {
        ResourceObject::typed(Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(ns.into()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn pod_list() -> ResourceList { ResourceList::new(ResourceObject::typed(Pod::default())) }

    #[tokio::test]
    async fn create_stamps_server_fields() {
        let store = MemoryStore::new(&Registry::builtin());
        let mut obj = pod("default", "web", &[]);
        store.create(&mut obj).await.expect("create");
        let meta = obj.meta();
        assert!(meta.uid.is_some());
        assert!(meta.creation_timestamp.is_some());
        assert_eq!(meta.resource_version.as_deref(), Some("1"));

        let mut again = pod("default", "web", &[]);
        assert!(matches!(store.create(&mut again).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new(&Registry::builtin());
        let mut obj = pod("default", "web", &[]);
        store.create(&mut obj).await.expect("create");
        let mut stale = obj.clone();
        obj.meta_mut().labels = Some([("v".to_string(), "2".to_string())].into());
        store.update(&mut obj).await.expect("update");
        assert_eq!(obj.meta().resource_version.as_deref(), Some("2"));
        stale.meta_mut().labels = Some([("v".to_string(), "3".to_string())].into());
        assert!(matches!(store.update(&mut stale).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn list_filters_namespace_and_labels() {
        let store = MemoryStore::new(&Registry::builtin());
        for (ns, name, app) in [("a", "p1", "web"), ("a", "p2", "db"), ("b", "p3", "web")] {
            store.create(&mut pod(ns, name, &[("app", app)])).await.expect("create");
        }
        let mut list = pod_list();
        store.list(&mut list, &ListOptions::in_namespace("a")).await.expect("list");
        assert_eq!(list.items.len(), 2);

        let mut list = pod_list();
        let opts = ListOptions::default().labels(Some("app=web".into()));
        store.list(&mut list, &opts).await.expect("list");
        let mut names: Vec<_> = list.items.iter().map(|o| o.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["p1", "p3"]);
    }

    #[tokio::test]
    async fn patch_applies_diff_and_keeps_uid() {
        let store = MemoryStore::new(&Registry::builtin());
        let mut obj = pod("default", "web", &[("app", "web")]);
        store.create(&mut obj).await.expect("create");
        let uid = obj.meta().uid.clone();

        let base = obj.clone();
        let mut next = pod("default", "web", &[("app", "web"), ("tier", "front")]);
        store.patch(&mut next, MergeFrom::new(&base)).await.expect("patch");
        assert_eq!(next.meta().uid, uid);
        assert_eq!(next.meta().labels.as_ref().and_then(|l| l.get("tier")).map(String::as_str), Some("front"));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryStore::new(&Registry::builtin());
        let obj = pod("default", "ghost", &[]);
        assert!(matches!(store.delete(&obj).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn watch_delivers_and_stops() {
        let store = MemoryStore::new(&Registry::builtin());
        let mut handle = store.watch(&pod_list(), &ListOptions::in_namespace("default")).await.expect("watch");
        assert_eq!(store.active_watches(), 1);

        store.create(&mut pod("other", "skip", &[])).await.expect("create other");
        let mut obj = pod("default", "web", &[]);
        store.create(&mut obj).await.expect("create");
        store.delete(&obj).await.expect("delete");

        let first = tokio::time::timeout(Duration::from_secs(1), handle.rx.recv()).await.expect("timely").expect("event");
        assert_eq!(first.event_type, EventType::Added);
        assert_eq!(first.object.name(), "web");
        let second = tokio::time::timeout(Duration::from_secs(1), handle.rx.recv()).await.expect("timely").expect("event");
        assert_eq!(second.event_type, EventType::Deleted);

        handle.cancel.cancel();
        assert_eq!(store.stopped_watches(), 1);
        tokio::time::timeout(Duration::from_secs(1), async {
            while store.active_watches() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("producer exits");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_reach_watchers_in_version_order() {
        let store = Arc::new(MemoryStore::new(&Registry::builtin()));
        let mut handle = store.watch(&pod_list(), &ListOptions::in_namespace("default")).await.expect("watch");

        let writers: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.create(&mut pod("default", &format!("p{i}"), &[])).await.expect("create");
                })
            })
            .collect();
        for w in writers {
            w.await.expect("join");
        }

        let mut versions = Vec::new();
        while versions.len() < 32 {
            let ev = tokio::time::timeout(Duration::from_secs(2), handle.rx.recv()).await.expect("timely").expect("event");
            let rv = ev.object.meta().resource_version.clone().expect("resourceVersion");
            versions.push(rv.parse::<u64>().expect("numeric"));
        }
        assert!(versions.windows(2).all(|w| w[0] < w[1]), "out of order: {versions:?}");
    }
}
