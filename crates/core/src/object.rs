//! Object containers: statically typed schema objects and generic mappings
//! behind one handle.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use kube::core::{DynamicObject, TypeMeta};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{CoreError, GroupVersionKind, Result};

/// Object-safe view over a generated schema type.
pub trait TypedResource: fmt::Debug + Send + Sync + 'static {
    fn gvk(&self) -> GroupVersionKind;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn to_value(&self) -> serde_json::Result<Value>;
    /// Replace the contents with a decoded mapping.
    fn load_value(&mut self, value: Value) -> serde_json::Result<()>;
    fn boxed_clone(&self) -> Box<dyn TypedResource>;
    /// A zero-valued instance of the same type.
    fn fresh(&self) -> Box<dyn TypedResource>;
}

impl<K> TypedResource for K
where
    K: k8s_openapi::Resource
        + Metadata<Ty = ObjectMeta>
        + Serialize
        + DeserializeOwned
        + Default
        + Clone
        + fmt::Debug
        + Send
        + Sync
        + 'static,
{
    fn gvk(&self) -> GroupVersionKind { GroupVersionKind::new(K::GROUP, K::VERSION, K::KIND) }
    fn meta(&self) -> &ObjectMeta { self.metadata() }
    fn meta_mut(&mut self) -> &mut ObjectMeta { self.metadata_mut() }
    fn to_value(&self) -> serde_json::Result<Value> { serde_json::to_value(self) }
    fn load_value(&mut self, value: Value) -> serde_json::Result<()> {
        *self = serde_json::from_value(value)?;
        Ok(())
    }
    fn boxed_clone(&self) -> Box<dyn TypedResource> { Box::new(self.clone()) }
    fn fresh(&self) -> Box<dyn TypedResource> { Box::new(K::default()) }
}

/// A single cluster object, either a known schema type or a generic mapping.
#[derive(Debug)]
pub enum ResourceObject {
    Typed(Box<dyn TypedResource>),
    Generic(DynamicObject),
}

impl Clone for ResourceObject {
    fn clone(&self) -> Self {
        match self {
            ResourceObject::Typed(t) => ResourceObject::Typed(t.boxed_clone()),
            ResourceObject::Generic(d) => ResourceObject::Generic(d.clone()),
        }
    }
}

impl From<DynamicObject> for ResourceObject {
    fn from(d: DynamicObject) -> Self { ResourceObject::Generic(d) }
}

impl ResourceObject {
    pub fn typed<K: TypedResource>(obj: K) -> Self { ResourceObject::Typed(Box::new(obj)) }

    /// Empty generic container stamped with `gvk`.
    pub fn generic(gvk: &GroupVersionKind) -> Self {
        ResourceObject::Generic(DynamicObject {
            types: Some(TypeMeta { api_version: gvk.api_version(), kind: gvk.kind.clone() }),
            metadata: ObjectMeta::default(),
            data: Value::Object(Map::new()),
        })
    }

    pub fn is_typed(&self) -> bool { matches!(self, ResourceObject::Typed(_)) }

    pub fn gvk(&self) -> GroupVersionKind {
        match self {
            ResourceObject::Typed(t) => t.gvk(),
            ResourceObject::Generic(d) => d
                .types
                .as_ref()
                .map(|t| GroupVersionKind::from_api_version(&t.api_version, t.kind.clone()))
                .unwrap_or_default(),
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ResourceObject::Typed(t) => t.meta(),
            ResourceObject::Generic(d) => &d.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ResourceObject::Typed(t) => t.meta_mut(),
            ResourceObject::Generic(d) => &mut d.metadata,
        }
    }

    pub fn name(&self) -> &str { self.meta().name.as_deref().unwrap_or("") }
    pub fn namespace(&self) -> &str { self.meta().namespace.as_deref().unwrap_or("") }

    /// Fresh container of the same kind and representation.
    pub fn empty_like(&self) -> Self {
        match self {
            ResourceObject::Typed(t) => ResourceObject::Typed(t.fresh()),
            ResourceObject::Generic(_) => ResourceObject::generic(&self.gvk()),
        }
    }

    /// Generic JSON tree of the object.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            ResourceObject::Typed(t) => Ok(t.to_value()?),
            ResourceObject::Generic(d) => Ok(serde_json::to_value(d)?),
        }
    }

    /// Decode `value` into this container.
    ///
    /// A stated `apiVersion`/`kind` must match the container's kind; absent
    /// ones are filled in. On error the container is left untouched.
    pub fn load(&mut self, mut value: Value) -> Result<()> {
        let gvk = self.gvk();
        stamp_type(&mut value, &gvk)?;
        #[cfg(feature = "strip-managed-fields")]
        strip_managed_fields(&mut value);
        match self {
            ResourceObject::Typed(t) => {
                let mut next = t.fresh();
                next.load_value(value)?;
                *t = next;
            }
            ResourceObject::Generic(d) => *d = decode_generic(value, &gvk)?,
        }
        Ok(())
    }
}

impl Serialize for ResourceObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ResourceObject::Typed(t) => t.to_value().map_err(serde::ser::Error::custom)?.serialize(serializer),
            ResourceObject::Generic(d) => d.serialize(serializer),
        }
    }
}

/// A collection of objects of one kind.
#[derive(Debug, Clone)]
pub struct ResourceList {
    gvk: GroupVersionKind,
    prototype: ResourceObject,
    pub resource_version: Option<String>,
    pub items: Vec<ResourceObject>,
}

impl ResourceList {
    /// `prototype` is an empty element container; its kind fixes the list kind.
    pub fn new(prototype: ResourceObject) -> Self {
        let gvk = prototype.gvk().to_list();
        Self { gvk, prototype, resource_version: None, items: Vec::new() }
    }

    pub fn gvk(&self) -> &GroupVersionKind { &self.gvk }
    pub fn item_gvk(&self) -> GroupVersionKind { self.gvk.to_item() }
    pub fn is_typed(&self) -> bool { self.prototype.is_typed() }

    pub fn new_item(&self) -> ResourceObject { self.prototype.empty_like() }

    pub fn push_value(&mut self, value: Value) -> Result<()> {
        let mut item = self.new_item();
        item.load(value)?;
        self.items.push(item);
        Ok(())
    }

    pub fn into_items(self) -> Vec<ResourceObject> { self.items }
}

fn stamp_type(value: &mut Value, gvk: &GroupVersionKind) -> Result<()> {
    let map = value.as_object_mut().ok_or(CoreError::NotAnObject)?;
    let api_version = gvk.api_version();
    let stated_version = map.get("apiVersion").and_then(Value::as_str).filter(|s| !s.is_empty());
    let stated_kind = map.get("kind").and_then(Value::as_str).filter(|s| !s.is_empty());
    let version_ok = stated_version.map_or(true, |v| v == api_version);
    let kind_ok = stated_kind.map_or(true, |k| k == gvk.kind);
    if !(version_ok && kind_ok) {
        return Err(CoreError::KindMismatch {
            expected: gvk.to_string(),
            found: format!("{}/{}", stated_version.unwrap_or(&api_version), stated_kind.unwrap_or(&gvk.kind)),
        });
    }
    map.insert("apiVersion".into(), Value::String(api_version));
    map.insert("kind".into(), Value::String(gvk.kind.clone()));
    Ok(())
}

fn decode_generic(value: Value, gvk: &GroupVersionKind) -> Result<DynamicObject> {
    let Value::Object(mut map) = value else { return Err(CoreError::NotAnObject) };
    let metadata = match map.remove("metadata") {
        Some(Value::Null) | None => ObjectMeta::default(),
        Some(m) => serde_json::from_value(m)?,
    };
    let api_version = take_string(&mut map, "apiVersion").unwrap_or_else(|| gvk.api_version());
    let kind = take_string(&mut map, "kind").unwrap_or_else(|| gvk.kind.clone());
    Ok(DynamicObject { types: Some(TypeMeta { api_version, kind }), metadata, data: Value::Object(map) })
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

#[cfg(feature = "strip-managed-fields")]
fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("managedFields");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;

    #[test]
    fn typed_load_stamps_missing_type() {
        let mut obj = ResourceObject::typed(Pod::default());
        obj.load(json!({"metadata": {"name": "web", "namespace": "default"}, "spec": {"containers": []}}))
            .expect("load");
        assert_eq!(obj.name(), "web");
        assert_eq!(obj.namespace(), "default");
        let v = obj.to_value().expect("value");
        assert_eq!(v["kind"], "Pod");
        assert_eq!(v["apiVersion"], "v1");
    }

    #[test]
    fn load_rejects_other_kind() {
        let mut obj = ResourceObject::typed(Pod::default());
        let err = obj
            .load(json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "x"}}))
            .expect_err("mismatch");
        assert!(matches!(err, CoreError::KindMismatch { .. }));
        assert_eq!(obj.name(), "");
    }

    #[test]
    fn generic_keeps_unknown_fields() {
        let gvk = GroupVersionKind::new("samples.dtweave.io", "v1", "Guestbook");
        let mut obj = ResourceObject::generic(&gvk);
        obj.load(json!({
            "metadata": {"name": "gb", "managedFields": [{"manager": "kubectl"}]},
            "spec": {"size": 3}
        }))
        .expect("load");
        let v = obj.to_value().expect("value");
        assert_eq!(v["spec"]["size"], 3);
        assert_eq!(v["apiVersion"], "samples.dtweave.io/v1");
        assert!(v["metadata"].get("managedFields").is_none());
        assert_eq!(obj.gvk(), gvk);
    }

    #[test]
    fn list_decodes_items_with_prototype() {
        let mut list = ResourceList::new(ResourceObject::typed(Pod::default()));
        assert_eq!(list.gvk().kind, "PodList");
        list.push_value(json!({"metadata": {"name": "a"}})).expect("a");
        list.push_value(json!({"metadata": {"name": "b"}})).expect("b");
        let names: Vec<_> = list.into_items().iter().map(|o| o.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
