//! JSON merge patches (RFC 7386).

use serde_json::{Map, Value};

/// Patch document that turns `old` into `new`.
///
/// Keys absent from `new` become `null`; nested mappings are diffed
/// recursively; everything else is replaced whole.
pub fn merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();
            for (key, new_val) in new_map {
                match old_map.get(key) {
                    Some(old_val) if old_val == new_val => {}
                    Some(old_val @ Value::Object(_)) if new_val.is_object() => {
                        let nested = merge_patch(old_val, new_val);
                        if nested.as_object().is_some_and(|m| !m.is_empty()) {
                            patch.insert(key.clone(), nested);
                        }
                    }
                    _ => {
                        patch.insert(key.clone(), new_val.clone());
                    }
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// Apply a merge patch to `target` in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, val) in patch_map {
            if val.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), val);
            }
        }
    }
}
