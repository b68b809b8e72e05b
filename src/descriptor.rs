//! Content descriptors: the handle to a piece of content (mediaType,
//! digest, size) plus the optional fields the referrers/artifact machinery
//! needs (`artifactType`, `subject`, `annotations`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `{mediaType, digest, size, artifactType?, subject?, annotations?}`.
///
/// Immutable once constructed: mutating methods return a new `Descriptor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(rename = "artifactType", default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Box<Descriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            artifact_type: None,
            subject: None,
            annotations: None,
        }
    }

    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    pub fn with_subject(mut self, subject: Descriptor) -> Self {
        self.subject = Some(Box::new(subject));
        self
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// A descriptor is "empty" when mediaType, digest, and size are all
    /// zero-valued — the sentinel used to probe `/referrers/` support.
    pub fn is_empty(&self) -> bool {
        self.media_type.is_empty() && self.digest.is_empty() && self.size == 0
    }

    pub fn zero() -> Self {
        Self {
            media_type: String::new(),
            digest: String::new(),
            size: 0,
            artifact_type: None,
            subject: None,
            annotations: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_descriptor_is_empty() {
        assert!(Descriptor::zero().is_empty());
        assert!(!Descriptor::new("application/octet-stream", "sha256:aa", 1).is_empty());
    }

    #[test]
    fn omits_optional_fields_when_absent() {
        let d = Descriptor::new("application/octet-stream", "sha256:aa", 1);
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("artifactType"));
        assert!(!json.contains("subject"));
        assert!(!json.contains("annotations"));
    }
}
