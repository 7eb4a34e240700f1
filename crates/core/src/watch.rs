//! Watch event types shared by the stores and the stream bridge.

use std::fmt;

use kube::core::{DynamicObject, TypeMeta};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ObjectMeta, ResourceObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Change notification from a store watch.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub object: ResourceObject,
}

impl WatchEvent {
    pub fn new(event_type: EventType, object: ResourceObject) -> Self { Self { event_type, object } }

    /// `ERROR` event carrying a `Status` object.
    pub fn error(code: u16, reason: &str, message: &str) -> Self {
        let status = DynamicObject {
            types: Some(TypeMeta { api_version: "v1".into(), kind: "Status".into() }),
            metadata: ObjectMeta::default(),
            data: json!({"status": "Failure", "code": code, "reason": reason, "message": message}),
        };
        Self::new(EventType::Error, ResourceObject::Generic(status))
    }
}
