//! Registry access used by discovery and synchronization.

use bytes::Bytes;
use keeper_oci::{Digest, ImageReference, Manifest, RegistryError};

/// OCI distribution operations against any registry.
///
/// Blob operations act on the repository of `image`; its tag or digest is
/// ignored. Absence is `Ok(None)`/`Ok(false)`/an empty list, never an error.
pub trait RegistryClient: Send + Sync {
    fn get_manifest(&self, image: &ImageReference) -> Result<Option<Manifest>, RegistryError>;

    fn manifest_exists(&self, image: &ImageReference) -> Result<bool, RegistryError>;

    /// All tags of `repository` on `registry`.
    fn list_tags(&self, registry: &str, repository: &str) -> Result<Vec<String>, RegistryError>;

    fn blob_exists(&self, image: &ImageReference, digest: &Digest) -> Result<bool, RegistryError>;

    fn get_blob(&self, image: &ImageReference, digest: &Digest) -> Result<Bytes, RegistryError>;

    /// `data` is shared, so resending it on retry does not copy the blob.
    fn put_blob(&self, image: &ImageReference, digest: &Digest, data: Bytes) -> Result<(), RegistryError>;

    /// Upload `manifest` under the tag or digest of `image`, with its
    /// original media type.
    fn put_manifest(&self, image: &ImageReference, manifest: &Manifest) -> Result<(), RegistryError>;
}
