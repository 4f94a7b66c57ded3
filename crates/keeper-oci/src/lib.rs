//! OCI registry types.
//!
//! Wire-level vocabulary shared by the registry synchronizer: image
//! references, content digests, manifest media types and the cosign
//! convention that stores signatures, attestations and SBOMs under tags
//! derived from the signed manifest's digest.

pub mod artifact;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod reference;

pub use artifact::{ArtifactReference, ArtifactRole};
pub use digest::Digest;
pub use error::RegistryError;
pub use manifest::{
    Descriptor, Manifest, ManifestKind, ACCEPTED_MANIFEST_TYPES, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, OCI_INDEX,
    OCI_MANIFEST,
};
pub use reference::{ImageReference, Reference};

/// Registry host Docker Hub images resolve to.
pub const DOCKER_HUB_HOST: &str = "docker.io";

/// API host actually serving Docker Hub's distribution API.
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
