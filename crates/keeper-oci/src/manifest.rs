//! Manifests and the descriptors they reference.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::RegistryError;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Media types sent in `Accept` when fetching manifests.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] = &[OCI_INDEX, OCI_MANIFEST, DOCKER_MANIFEST_LIST, DOCKER_MANIFEST];

/// A content descriptor inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: Digest,
    #[serde(default)]
    pub size: u64,
}

/// What a manifest points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestKind {
    /// Multi-platform index: child manifests.
    Index { manifests: Vec<Descriptor> },
    /// Single image (or cosign artifact): config blob and layers.
    Image { config: Descriptor, layers: Vec<Descriptor> },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<Vec<Descriptor>>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

/// A manifest exactly as served by a registry.
///
/// The raw bytes are kept untouched: re-serializing would change the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub media_type: String,
    pub digest: Digest,
    pub bytes: Vec<u8>,
}

impl Manifest {
    /// Wrap raw bytes, taking the media type from the body when the
    /// registry did not send one.
    pub fn from_bytes(bytes: Vec<u8>, content_type: Option<&str>) -> Result<Self, RegistryError> {
        let raw: RawManifest = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::InvalidManifest(e.to_string()))?;
        let media_type = content_type
            .filter(|ct| !ct.is_empty() && *ct != "application/json")
            .map(str::to_string)
            .or(raw.media_type)
            .unwrap_or_else(|| OCI_MANIFEST.to_string());
        Ok(Self {
            media_type,
            digest: Digest::sha256(&bytes),
            bytes,
        })
    }

    /// Parse the references this manifest carries.
    pub fn kind(&self) -> Result<ManifestKind, RegistryError> {
        let raw: RawManifest = serde_json::from_slice(&self.bytes)
            .map_err(|e| RegistryError::InvalidManifest(e.to_string()))?;
        if let Some(manifests) = raw.manifests {
            return Ok(ManifestKind::Index { manifests });
        }
        match raw.config {
            Some(config) => Ok(ManifestKind::Image {
                config,
                layers: raw.layers,
            }),
            None => Err(RegistryError::InvalidManifest(format!(
                "manifest {} has neither manifests nor config",
                self.digest
            ))),
        }
    }

    pub fn is_index(&self) -> bool {
        self.media_type == OCI_INDEX || self.media_type == DOCKER_MANIFEST_LIST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(c: char) -> String {
        format!("sha256:{}", c.to_string().repeat(64))
    }

    #[test]
    fn test_image_manifest_kind() {
        let body = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": digest('a'), "size": 10},
            "layers": [{"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": digest('b'), "size": 20}]
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        let manifest = Manifest::from_bytes(bytes.clone(), None).unwrap();

        assert_eq!(manifest.media_type, OCI_MANIFEST);
        assert_eq!(manifest.digest, Digest::sha256(&bytes));
        match manifest.kind().unwrap() {
            ManifestKind::Image { config, layers } => {
                assert_eq!(config.size, 10);
                assert_eq!(layers.len(), 1);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
        assert!(!manifest.is_index());
    }

    #[test]
    fn test_index_kind_and_content_type_precedence() {
        let body = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{"mediaType": OCI_MANIFEST, "digest": digest('c'), "size": 5}]
        });
        let manifest =
            Manifest::from_bytes(serde_json::to_vec(&body).unwrap(), Some(DOCKER_MANIFEST_LIST)).unwrap();
        assert_eq!(manifest.media_type, DOCKER_MANIFEST_LIST);
        assert!(manifest.is_index());
        assert!(matches!(manifest.kind().unwrap(), ManifestKind::Index { manifests } if manifests.len() == 1));
    }

    #[test]
    fn test_invalid_manifest() {
        assert!(Manifest::from_bytes(b"not json".to_vec(), None).is_err());
        let manifest = Manifest::from_bytes(b"{}".to_vec(), None).unwrap();
        assert!(manifest.kind().is_err());
    }
}
