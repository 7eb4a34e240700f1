//! Kind to schema-type mapping.

use rustc_hash::FxHashMap;

use crate::{Constructor, GroupVersionKind, Registry, ResourceList, ResourceObject};

#[derive(Debug, Clone, Default)]
pub struct Scheme {
    types: FxHashMap<GroupVersionKind, Constructor>,
}

impl Scheme {
    pub fn from_registry(registry: &Registry) -> Self {
        let mut scheme = Self::default();
        for entry in registry.entries() {
            if let (Some(kind), Some(ctor)) = (&entry.kind, entry.constructor) {
                scheme.types.insert(kind.clone(), ctor);
            }
        }
        scheme
    }

    pub fn add(&mut self, gvk: GroupVersionKind, ctor: Constructor) { self.types.insert(gvk.to_item(), ctor); }

    /// True for schema kinds and their collection kinds.
    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool { self.types.contains_key(&gvk.to_item()) }

    /// Typed container for a recognized element kind.
    pub fn new_object(&self, gvk: &GroupVersionKind) -> Option<ResourceObject> {
        if gvk.is_list() {
            return None;
        }
        self.types.get(gvk).map(|ctor| ResourceObject::Typed(ctor()))
    }

    /// Typed collection for a recognized collection kind.
    pub fn new_list(&self, gvk: &GroupVersionKind) -> Option<ResourceList> {
        self.new_object(&gvk.to_item()).map(ResourceList::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_items_and_lists() {
        let scheme = Scheme::from_registry(&Registry::builtin());
        let pod = GroupVersionKind::new("", "v1", "Pod");
        assert!(scheme.recognizes(&pod));
        assert!(scheme.recognizes(&pod.to_list()));
        let gb = GroupVersionKind::new("samples.dtweave.io", "v1", "Guestbook");
        assert!(!scheme.recognizes(&gb));
        assert!(scheme.new_object(&pod).is_some_and(|o| o.is_typed()));
        assert!(scheme.new_object(&pod.to_list()).is_none());
        let list = scheme.new_list(&pod.to_list()).expect("pod list");
        assert_eq!(list.gvk().kind, "PodList");
    }
}
