//! Signed-entity artifacts and the cosign tag convention.
//!
//! Cosign stores the artifacts attached to a manifest `sha256:<hex>` in the
//! same repository under the tags `sha256-<hex>.sig`, `.att` and `.sbom`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::reference::ImageReference;

/// Role of an artifact within a signed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactRole {
    Signature,
    Attestation,
    Sbom,
    PrimaryManifest,
}

impl ArtifactRole {
    /// Roles attached to a primary manifest, in push order.
    pub const SATELLITES: [ArtifactRole; 3] = [
        ArtifactRole::Signature,
        ArtifactRole::Attestation,
        ArtifactRole::Sbom,
    ];

    /// Cosign tag suffix, `None` for the primary manifest.
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            ArtifactRole::Signature => Some("sig"),
            ArtifactRole::Attestation => Some("att"),
            ArtifactRole::Sbom => Some("sbom"),
            ArtifactRole::PrimaryManifest => None,
        }
    }

    pub fn is_satellite(&self) -> bool {
        !matches!(self, ArtifactRole::PrimaryManifest)
    }

    /// Tag under which this role's artifact for `subject` is stored.
    pub fn cosign_tag(&self, subject: &Digest) -> Option<String> {
        self.suffix()
            .map(|suffix| format!("{}-{}.{}", subject.algorithm(), subject.encoded(), suffix))
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactRole::Signature => "signature",
            ArtifactRole::Attestation => "attestation",
            ArtifactRole::Sbom => "sbom",
            ArtifactRole::PrimaryManifest => "primary-manifest",
        };
        f.write_str(name)
    }
}

/// An image reference tagged with the role it plays in a signed entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub image: ImageReference,
    pub role: ArtifactRole,
}

impl ArtifactReference {
    pub fn primary(image: ImageReference) -> Self {
        Self {
            image,
            role: ArtifactRole::PrimaryManifest,
        }
    }

    /// The satellite artifact of `role` attached to `subject` in the
    /// repository of `image`. Returns `None` for the primary role.
    pub fn satellite(image: &ImageReference, subject: &Digest, role: ArtifactRole) -> Option<Self> {
        role.cosign_tag(subject).map(|tag| Self {
            image: image.with_tag(&tag),
            role,
        })
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.image, self.role)
    }
}
