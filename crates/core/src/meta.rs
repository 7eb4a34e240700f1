//! Standard metadata envelope access.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use thiserror::Error;

use crate::ResourceObject;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessorError {
    #[error("object has no metadata.name")]
    MissingName,
}

/// Borrowed view of the metadata fields queries read.
#[derive(Debug, Clone, Copy)]
pub struct MetaView<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub uid: &'a str,
    /// `None` sorts before every real timestamp.
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub labels: Option<&'a BTreeMap<String, String>>,
    pub annotations: Option<&'a BTreeMap<String, String>>,
    pub owner_references: &'a [OwnerReference],
}

impl<'a> MetaView<'a> {
    pub fn from_meta(meta: &'a ObjectMeta) -> Result<Self, AccessorError> {
        let name = meta.name.as_deref().filter(|n| !n.is_empty()).ok_or(AccessorError::MissingName)?;
        Ok(Self {
            name,
            namespace: meta.namespace.as_deref().unwrap_or(""),
            uid: meta.uid.as_deref().unwrap_or(""),
            creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
            labels: meta.labels.as_ref(),
            annotations: meta.annotations.as_ref(),
            owner_references: meta.owner_references.as_deref().unwrap_or(&[]),
        })
    }
}

/// Types exposing the metadata envelope.
pub trait MetadataAccessor {
    fn accessor(&self) -> Result<MetaView<'_>, AccessorError>;
}

impl MetadataAccessor for ObjectMeta {
    fn accessor(&self) -> Result<MetaView<'_>, AccessorError> { MetaView::from_meta(self) }
}

impl MetadataAccessor for ResourceObject {
    fn accessor(&self) -> Result<MetaView<'_>, AccessorError> { MetaView::from_meta(self.meta()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_name_fails() {
        let meta = ObjectMeta { namespace: Some("default".into()), ..Default::default() };
        assert_eq!(meta.accessor().unwrap_err(), AccessorError::MissingName);
    }

    #[test]
    fn view_defaults_optional_fields() {
        let meta = ObjectMeta { name: Some("a".into()), ..Default::default() };
        let view = meta.accessor().expect("view");
        assert_eq!(view.namespace, "");
        assert!(view.creation_timestamp.is_none());
        assert!(view.owner_references.is_empty());
    }
}
