//! Registries held in memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use keeper_oci::{
    ArtifactReference, ArtifactRole, Digest, ImageReference, Manifest, Reference, RegistryError,
    OCI_MANIFEST,
};
use serde_json::json;

use super::failure::{FailureConfig, FailureInjector, RegistryOp};
use crate::sync::RegistryClient;

/// A recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetManifest(ImageReference),
    ManifestExists(ImageReference),
    ListTags { registry: String, repository: String },
    BlobExists(ImageReference, Digest),
    GetBlob(ImageReference, Digest),
    PutBlob(ImageReference, Digest),
    PutManifest(ImageReference),
}

type RepoKey = (String, String);

#[derive(Debug, Default)]
struct Repo {
    /// Tag to manifest digest
    tags: BTreeMap<String, Digest>,
    manifests: HashMap<Digest, Manifest>,
    blobs: HashMap<Digest, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    repos: HashMap<RepoKey, Repo>,
    calls: Vec<Call>,
    failures: FailureInjector,
    /// Manifests that show up at the destination after a number of
    /// existence checks
    appearing: Vec<(ImageReference, u32, Manifest)>,
}

/// Any number of registries in process memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(image: &ImageReference) -> RepoKey {
        (image.registry.clone(), image.repository.clone())
    }

    /// Store an image manifest with a config blob and one layer per entry
    /// of `layers`, tagged as `image`. Returns the stored manifest.
    pub fn add_image(&self, image: &ImageReference, layers: &[&[u8]]) -> Manifest {
        let config = format!("{{\"image\":\"{}\"}}", image).into_bytes();
        self.add_manifest_with_blobs(image, "application/vnd.oci.image.config.v1+json", config, layers)
    }

    /// Store a cosign artifact of `role` for the manifest `subject`.
    pub fn add_satellite(&self, image: &ImageReference, subject: &Digest, role: ArtifactRole) -> Option<Manifest> {
        let artifact = ArtifactReference::satellite(image, subject, role)?;
        let payload = format!("{{\"critical\":{{\"image\":{{\"docker-manifest-digest\":\"{}\"}}}}}}", subject);
        Some(self.add_manifest_with_blobs(
            &artifact.image,
            "application/vnd.oci.image.config.v1+json",
            b"{}".to_vec(),
            &[payload.as_bytes()],
        ))
    }

    /// Store a multi-platform index over the given child images.
    pub fn add_index(&self, image: &ImageReference, children: &[Manifest]) -> Manifest {
        let manifests: Vec<_> = children
            .iter()
            .map(|m| json!({"mediaType": m.media_type, "digest": m.digest.as_str(), "size": m.bytes.len()}))
            .collect();
        let body = json!({"schemaVersion": 2, "mediaType": keeper_oci::OCI_INDEX, "manifests": manifests});
        let manifest = manifest_from_json(body, keeper_oci::OCI_INDEX);
        self.store_manifest(image, manifest.clone());
        manifest
    }

    fn add_manifest_with_blobs(
        &self,
        image: &ImageReference,
        config_type: &str,
        config: Vec<u8>,
        layers: &[&[u8]],
    ) -> Manifest {
        let mut state = self.state();
        let repo = state.repos.entry(Self::key(image)).or_default();

        let config_digest = Digest::sha256(&config);
        let layer_descriptors: Vec<_> = layers
            .iter()
            .map(|layer| {
                let digest = Digest::sha256(layer);
                repo.blobs.insert(digest.clone(), layer.to_vec());
                json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": digest.as_str(),
                    "size": layer.len(),
                })
            })
            .collect();
        let body = json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {"mediaType": config_type, "digest": config_digest.as_str(), "size": config.len()},
            "layers": layer_descriptors,
        });
        repo.blobs.insert(config_digest, config);
        drop(state);

        let manifest = manifest_from_json(body, OCI_MANIFEST);
        self.store_manifest(image, manifest.clone());
        manifest
    }

    fn store_manifest(&self, image: &ImageReference, manifest: Manifest) {
        let mut state = self.state();
        let repo = state.repos.entry(Self::key(image)).or_default();
        if let Reference::Tag(tag) = &image.reference {
            repo.tags.insert(tag.clone(), manifest.digest.clone());
        }
        repo.manifests.insert(manifest.digest.clone(), manifest);
    }

    /// Make `image` appear with `manifest` once it has been checked for
    /// existence `checks` times.
    pub fn appear_after_checks(&self, image: &ImageReference, checks: u32, manifest: Manifest) {
        self.state().appearing.push((image.clone(), checks, manifest));
    }

    pub fn inject(&self, op: RegistryOp, config: FailureConfig) {
        self.state().failures.inject(op, config);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Every manifest PUT, in order
    pub fn pushed_manifests(&self) -> Vec<ImageReference> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::PutManifest(image) => Some(image.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_manifest(&self, image: &ImageReference) -> bool {
        let state = self.state();
        lookup(&state, image).is_some()
    }

    pub fn has_blob(&self, image: &ImageReference, digest: &Digest) -> bool {
        self.state()
            .repos
            .get(&Self::key(image))
            .is_some_and(|repo| repo.blobs.contains_key(digest))
    }

    fn record(&self, state: &mut State, call: Call, op: RegistryOp, target: &str) -> Result<(), RegistryError> {
        state.calls.push(call);
        match state.failures.check(op, target) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn manifest_from_json(body: serde_json::Value, media_type: &str) -> Manifest {
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    Manifest {
        media_type: media_type.to_string(),
        digest: Digest::sha256(&bytes),
        bytes,
    }
}

fn lookup<'a>(state: &'a State, image: &ImageReference) -> Option<&'a Manifest> {
    let repo = state
        .repos
        .get(&(image.registry.clone(), image.repository.clone()))?;
    let digest = match &image.reference {
        Reference::Tag(tag) => repo.tags.get(tag)?,
        Reference::Digest(digest) => digest,
    };
    repo.manifests.get(digest)
}

impl RegistryClient for MemoryRegistry {
    fn get_manifest(&self, image: &ImageReference) -> Result<Option<Manifest>, RegistryError> {
        let mut state = self.state();
        self.record(&mut state, Call::GetManifest(image.clone()), RegistryOp::GetManifest, &image.to_string())?;
        Ok(lookup(&state, image).cloned())
    }

    fn manifest_exists(&self, image: &ImageReference) -> Result<bool, RegistryError> {
        let mut state = self.state();
        self.record(
            &mut state,
            Call::ManifestExists(image.clone()),
            RegistryOp::ManifestExists,
            &image.to_string(),
        )?;

        let mut appeared = None;
        for (pending, checks, manifest) in state.appearing.iter_mut() {
            if pending == image {
                if *checks == 0 {
                    appeared = Some(manifest.clone());
                } else {
                    *checks -= 1;
                }
            }
        }
        if let Some(manifest) = appeared {
            state.appearing.retain(|(pending, _, _)| pending != image);
            drop(state);
            self.store_manifest(image, manifest);
            return Ok(true);
        }
        Ok(lookup(&state, image).is_some())
    }

    fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, RegistryError> {
        let mut state = self.state();
        self.record(
            &mut state,
            Call::ListTags {
                registry: registry.to_string(),
                repository: repository.to_string(),
            },
            RegistryOp::ListTags,
            &format!("{}/{}", registry, repository),
        )?;
        Ok(state
            .repos
            .get(&(registry.to_string(), repository.to_string()))
            .map(|repo| repo.tags.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn blob_exists(&self, image: &ImageReference, digest: &Digest) -> Result<bool, RegistryError> {
        let mut state = self.state();
        let target = format!("{}/{}@{}", image.registry, image.repository, digest);
        self.record(&mut state, Call::BlobExists(image.clone(), digest.clone()), RegistryOp::BlobExists, &target)?;
        Ok(state
            .repos
            .get(&Self::key(image))
            .is_some_and(|repo| repo.blobs.contains_key(digest)))
    }

    fn get_blob(&self, image: &ImageReference, digest: &Digest) -> Result<Bytes, RegistryError> {
        let mut state = self.state();
        let target = format!("{}/{}@{}", image.registry, image.repository, digest);
        self.record(&mut state, Call::GetBlob(image.clone(), digest.clone()), RegistryOp::GetBlob, &target)?;
        state
            .repos
            .get(&Self::key(image))
            .and_then(|repo| repo.blobs.get(digest).map(|blob| Bytes::copy_from_slice(blob)))
            .ok_or(RegistryError::Http {
                status: 404,
                url: target,
            })
    }

    fn put_blob(&self, image: &ImageReference, digest: &Digest, data: Bytes) -> Result<(), RegistryError> {
        let mut state = self.state();
        let target = format!("{}/{}@{}", image.registry, image.repository, digest);
        self.record(&mut state, Call::PutBlob(image.clone(), digest.clone()), RegistryOp::PutBlob, &target)?;
        if !digest.verifies(&data) {
            return Err(RegistryError::DigestMismatch {
                reference: target,
                expected: digest.to_string(),
                actual: Digest::sha256(&data).to_string(),
            });
        }
        state
            .repos
            .entry(Self::key(image))
            .or_default()
            .blobs
            .insert(digest.clone(), data.to_vec());
        Ok(())
    }

    fn put_manifest(&self, image: &ImageReference, manifest: &Manifest) -> Result<(), RegistryError> {
        let mut state = self.state();
        self.record(&mut state, Call::PutManifest(image.clone()), RegistryOp::PutManifest, &image.to_string())?;
        drop(state);
        self.store_manifest(image, manifest.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_image() {
        let registry = MemoryRegistry::new();
        let image = ImageReference::tagged("stg.example.com", "rancher/fleet", "v1.0.0");
        let manifest = registry.add_image(&image, &[b"layer"]);

        assert_eq!(registry.get_manifest(&image).unwrap(), Some(manifest.clone()));
        assert!(registry.manifest_exists(&image.with_digest(manifest.digest.clone())).unwrap());
        assert_eq!(
            registry.list_tags("stg.example.com", "rancher/fleet").unwrap(),
            vec!["v1.0.0"]
        );
        assert!(registry.list_tags("stg.example.com", "rancher/other").unwrap().is_empty());
    }

    #[test]
    fn test_satellite_tag() {
        let registry = MemoryRegistry::new();
        let image = ImageReference::tagged("stg.example.com", "rancher/fleet", "v1.0.0");
        let manifest = registry.add_image(&image, &[b"layer"]);
        registry
            .add_satellite(&image, &manifest.digest, ArtifactRole::Signature)
            .unwrap();

        let tags = registry.list_tags("stg.example.com", "rancher/fleet").unwrap();
        assert!(tags.iter().any(|t| t.ends_with(".sig")));
    }

    #[test]
    fn test_appear_after_checks() {
        let registry = MemoryRegistry::new();
        let image = ImageReference::tagged("prime.example.com", "rancher/fleet", "v1");
        let manifest = manifest_from_json(json!({"config": {"digest": Digest::sha256(b"c").as_str()}}), OCI_MANIFEST);
        registry.appear_after_checks(&image, 1, manifest);

        assert!(!registry.manifest_exists(&image).unwrap());
        assert!(registry.manifest_exists(&image).unwrap());
        assert!(registry.has_manifest(&image));
    }

    #[test]
    fn test_calls_recorded_and_failures_injected() {
        let registry = MemoryRegistry::new();
        registry.inject(RegistryOp::ListTags, FailureConfig::rate_limited("docker.io").with_fail_count(1));

        assert!(registry.list_tags("docker.io", "rancher/fleet").unwrap_err().is_rate_limited());
        assert!(registry.list_tags("docker.io", "rancher/fleet").is_ok());
        assert_eq!(registry.calls().len(), 2);
    }
}
