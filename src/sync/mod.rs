//! Cross-registry image synchronization
//!
//! Copies images that the prime registry lacks from staging (with their
//! cosign signature, attestation and SBOM) or from Docker Hub (primary
//! manifest only). Nothing already present at the destination is ever
//! pushed again.

mod auth;
mod client;
mod http;
mod plan;
mod retry;
mod synchronizer;

use keeper_oci::{ArtifactReference, ImageReference, RegistryError};

use crate::config::RegistrySettings;
use crate::images::SyncManifest;

pub use auth::{CredentialProvider, Credentials, EnvCredentials};
pub use client::RegistryClient;
pub use http::HttpRegistryClient;
pub use plan::{PlanEntry, SyncPlan};
pub use retry::RetryPolicy;
pub use synchronizer::{RegistrySynchronizer, SourceKind, SyncJob, SyncOutcome};

/// Host names of the three registries involved in a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHosts {
    pub docker: String,
    pub staging: String,
    pub prime: String,
}

impl From<&RegistrySettings> for RegistryHosts {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            docker: settings.docker.host.clone(),
            staging: settings.staging.host.clone(),
            prime: settings.prime.host.clone(),
        }
    }
}

/// Jobs for both sync manifests, staging entries first.
pub fn jobs_from_manifests(staging: &SyncManifest, docker: &SyncManifest, hosts: &RegistryHosts) -> Vec<SyncJob> {
    let staging_jobs = staging.iter().map(|(repository, tag)| {
        SyncJob::new(
            ImageReference::tagged(&hosts.staging, repository, tag),
            SourceKind::Staging,
            &hosts.prime,
        )
    });
    let docker_jobs = docker.iter().map(|(repository, tag)| {
        SyncJob::new(
            ImageReference::tagged(&hosts.docker, repository, tag),
            SourceKind::DockerHub,
            &hosts.prime,
        )
    });
    staging_jobs.chain(docker_jobs).collect()
}

/// Sync result type
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors from one sync job
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{artifact}: {source}")]
    Registry {
        artifact: String,
        #[source]
        source: RegistryError,
    },

    #[error("{artifact} appeared at the destination during the sync; refusing to overwrite")]
    ConsistencyViolation { artifact: ArtifactReference },

    #[error("{image}: {} artifact(s) failed after pushing {}: {}", failed.len(), pushed.len(), describe_failures(failed))]
    PartialFailure {
        image: ImageReference,
        pushed: Vec<ArtifactReference>,
        failed: Vec<(ArtifactReference, RegistryError)>,
        /// Not pushed because an artifact it depends on failed
        withheld: Vec<ArtifactReference>,
    },

    #[error("manifest nesting too deep at {0}")]
    NestingTooDeep(String),
}

impl SyncError {
    pub fn registry(artifact: impl ToString, source: RegistryError) -> Self {
        SyncError::Registry {
            artifact: artifact.to_string(),
            source,
        }
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, SyncError::ConsistencyViolation { .. })
    }
}

fn describe_failures(failed: &[(ArtifactReference, RegistryError)]) -> String {
    failed
        .iter()
        .map(|(artifact, error)| format!("{} ({})", artifact, error))
        .collect::<Vec<_>>()
        .join(", ")
}
