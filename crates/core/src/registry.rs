//! Supported resource registry: short resource name to GVR, plus an optional
//! typed constructor per entry. Built once at startup and shared read-only.

use rustc_hash::FxHashMap;

use crate::{CoreError, GroupVersionKind, GroupVersionResource, ResourceObject, Result, TypedResource};

pub type Constructor = fn() -> Box<dyn TypedResource>;

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub gvr: GroupVersionResource,
    /// Statically known kind; `None` leaves resolution to the store's mapper.
    pub kind: Option<GroupVersionKind>,
    pub constructor: Option<Constructor>,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
    by_name: FxHashMap<String, usize>,
}

fn construct<K: TypedResource + Default>() -> Box<dyn TypedResource> { Box::new(K::default()) }

impl Registry {
    pub fn empty() -> Self { Self::default() }

    /// Built-in resource table.
    pub fn builtin() -> Self {
        use k8s_openapi::api::{apps::v1 as apps, autoscaling::v2 as autoscaling, batch::v1 as batch};
        use k8s_openapi::api::{core::v1 as corev1, networking::v1 as networking, rbac::v1 as rbac};
        use k8s_openapi::api::storage::v1 as storage;
        use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiextensions;

        let mut r = Self::empty();
        r.register_typed::<corev1::Namespace>()
            .register_typed::<corev1::Node>()
            .register_typed::<corev1::Pod>()
            .register_typed::<corev1::Service>()
            .register_typed::<corev1::Secret>()
            .register_typed::<corev1::ConfigMap>()
            .register_typed::<corev1::ServiceAccount>()
            .register_typed::<corev1::ResourceQuota>()
            .register_typed::<corev1::PersistentVolumeClaim>()
            .register_typed::<corev1::PersistentVolume>()
            .register_typed::<rbac::Role>()
            .register_typed::<rbac::RoleBinding>()
            .register_typed::<rbac::ClusterRole>()
            .register_typed::<rbac::ClusterRoleBinding>()
            .register_typed::<apps::Deployment>()
            .register_typed::<apps::DaemonSet>()
            .register_typed::<apps::ReplicaSet>()
            .register_typed::<apps::StatefulSet>()
            .register_typed::<apps::ControllerRevision>()
            .register_typed::<storage::StorageClass>()
            .register_typed::<apiextensions::CustomResourceDefinition>()
            .register_typed::<batch::Job>()
            .register_typed::<batch::CronJob>()
            .register_typed::<networking::Ingress>()
            .register_typed::<autoscaling::HorizontalPodAutoscaler>()
            .register_generic(
                "guestbooks",
                GroupVersionResource::new("samples.dtweave.io", "v1", "guestbooks"),
                Some(GroupVersionKind::new("samples.dtweave.io", "v1", "Guestbook")),
            );
        r
    }

    /// Register a generated schema type under its plural URL segment.
    pub fn register_typed<K>(&mut self) -> &mut Self
    where
        K: TypedResource + k8s_openapi::Resource + Default,
    {
        let gvr = GroupVersionResource::new(K::GROUP, K::VERSION, K::URL_PATH_SEGMENT);
        self.insert(RegistryEntry {
            name: K::URL_PATH_SEGMENT.to_string(),
            gvr,
            kind: Some(GroupVersionKind::new(K::GROUP, K::VERSION, K::KIND)),
            constructor: Some(construct::<K> as Constructor),
        })
    }

    /// Register a resource without a schema type; its objects stay generic.
    pub fn register_generic(
        &mut self,
        name: impl Into<String>,
        gvr: GroupVersionResource,
        kind: Option<GroupVersionKind>,
    ) -> &mut Self {
        self.insert(RegistryEntry { name: name.into(), gvr, kind, constructor: None })
    }

    fn insert(&mut self, entry: RegistryEntry) -> &mut Self {
        match self.by_name.get(&entry.name) {
            Some(&idx) => self.entries[idx] = entry,
            None => {
                self.by_name.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        self
    }

    pub fn entry(&self, name: &str) -> Option<&RegistryEntry> { self.by_name.get(name).map(|&i| &self.entries[i]) }

    pub fn lookup(&self, name: &str) -> Result<&GroupVersionResource> {
        self.entry(name).map(|e| &e.gvr).ok_or_else(|| CoreError::UnsupportedResource(name.to_string()))
    }

    /// Fresh typed container for a registered name; unsupported when the
    /// entry has no schema type.
    pub fn new_object(&self, name: &str) -> Result<ResourceObject> {
        match self.entry(name).and_then(|e| e.constructor) {
            Some(ctor) => Ok(ResourceObject::Typed(ctor())),
            None => Err(CoreError::UnsupportedResource(name.to_string())),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> { self.entries.iter() }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup() {
        let reg = Registry::builtin();
        assert_eq!(reg.lookup("deployments").expect("deployments"), &GroupVersionResource::new("apps", "v1", "deployments"));
        assert_eq!(reg.lookup("pods").expect("pods").group, "");
        assert_eq!(reg.lookup("cronjobs").expect("cronjobs").group, "batch");
        assert!(matches!(reg.lookup("widgets"), Err(CoreError::UnsupportedResource(_))));
    }

    #[test]
    fn typed_entries_construct() {
        let reg = Registry::builtin();
        let obj = reg.new_object("configmaps").expect("configmap");
        assert!(obj.is_typed());
        assert_eq!(obj.gvk(), GroupVersionKind::new("", "v1", "ConfigMap"));
        assert!(matches!(reg.new_object("guestbooks"), Err(CoreError::UnsupportedResource(_))));
    }

    #[test]
    fn re_registration_replaces_entry() {
        let mut reg = Registry::empty();
        reg.register_generic("things", GroupVersionResource::new("a.io", "v1", "things"), None);
        reg.register_generic("things", GroupVersionResource::new("a.io", "v2", "things"), None);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup("things").expect("things").version, "v2");
    }
}
