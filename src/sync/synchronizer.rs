//! Per-image sync state machine.
//!
//! ```text
//! RESOLVE_SOURCE -> not found: skip
//! CHECK_DEST     -> exists: skip, never overwrite
//! STAGE          -> satellites (staging only) then primary, minus what the
//!                   destination already holds
//! PUSH           -> satellites first; the primary is withheld if any fail
//! ```

use std::fmt;

use keeper_oci::{
    ArtifactReference, ArtifactRole, Digest, ImageReference, Manifest, ManifestKind, Reference,
    RegistryError,
};

use super::{PlanEntry, RegistryClient, RetryPolicy, SyncError, SyncPlan, SyncResult};
use crate::error::BatchError;
use crate::pool::{JobResult, WorkerPool};

/// Index manifests nest at most this deep
const MAX_MANIFEST_DEPTH: usize = 4;

/// Where a job pulls from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Cosign-signed artifacts are copied along with the image
    Staging,
    /// Primary manifest only
    DockerHub,
}

/// Copy one tagged image to another registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub source: ImageReference,
    pub kind: SourceKind,
    pub destination_registry: String,
}

impl SyncJob {
    pub fn new(source: ImageReference, kind: SourceKind, destination_registry: &str) -> Self {
        Self {
            source,
            kind,
            destination_registry: destination_registry.to_string(),
        }
    }

    pub fn destination(&self) -> ImageReference {
        self.source.on_registry(&self.destination_registry)
    }
}

impl fmt::Display for SyncJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination_registry)
    }
}

/// How a job ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NotFoundAtSource,
    AlreadyAtDestination,
    Copied {
        pushed: Vec<ArtifactReference>,
        /// Staged artifacts the destination already held
        skipped: Vec<ArtifactReference>,
    },
}

/// Replicates images between registries through one shared client.
pub struct RegistrySynchronizer<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C: RegistryClient> RegistrySynchronizer<C> {
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run every job on `pool`; failures are collected, not short-circuited.
    pub fn sync_all(
        &self,
        pool: &WorkerPool,
        jobs: Vec<SyncJob>,
    ) -> Result<Vec<(SyncJob, SyncOutcome)>, BatchError<SyncError>> {
        let results = pool.run(jobs.clone(), |job| self.sync_image(&job));

        let mut done = Vec::new();
        let mut failures = BatchError::new();
        for (job, result) in jobs.into_iter().zip(results) {
            match result {
                JobResult::Done(outcome) => done.push((job, outcome)),
                JobResult::Failed(err) => failures.push(job.to_string(), err),
                JobResult::Cancelled => tracing::warn!(job = %job, "not started, cancelled"),
            }
        }
        failures.into_result().map(|()| done)
    }

    /// Copy one image unless the destination already has it.
    pub fn sync_image(&self, job: &SyncJob) -> SyncResult<SyncOutcome> {
        let source = &job.source;
        let destination = job.destination();

        let Some(primary) = self
            .retry
            .run("get manifest", || self.client.get_manifest(source))
            .map_err(|e| SyncError::registry(source, e))?
        else {
            tracing::info!(image = %source, "not found at source, skipping");
            return Ok(SyncOutcome::NotFoundAtSource);
        };

        if self.exists(&destination)? {
            tracing::info!(image = %destination, "already at destination, skipping");
            return Ok(SyncOutcome::AlreadyAtDestination);
        }

        let mut plan = self.stage(job, primary)?;
        let skipped: Vec<ArtifactReference> = plan
            .drop_where(|entry| self.exists(&entry.destination))?
            .into_iter()
            .map(|entry| {
                tracing::info!(artifact = %entry.source, "already at destination, dropped from plan");
                entry.source
            })
            .collect();

        let pushed = self.push(source, plan)?;
        Ok(SyncOutcome::Copied { pushed, skipped })
    }

    fn exists(&self, image: &ImageReference) -> SyncResult<bool> {
        self.retry
            .run("check manifest", || self.client.manifest_exists(image))
            .map_err(|e| SyncError::registry(image, e))
    }

    fn stage(&self, job: &SyncJob, primary: Manifest) -> SyncResult<SyncPlan> {
        let mut plan = SyncPlan::new();

        if job.kind == SourceKind::Staging {
            for role in ArtifactRole::SATELLITES {
                let Some(artifact) = ArtifactReference::satellite(&job.source, &primary.digest, role) else {
                    continue;
                };
                let found = self
                    .retry
                    .run("get manifest", || self.client.get_manifest(&artifact.image))
                    .map_err(|e| SyncError::registry(&artifact, e))?;
                if let Some(manifest) = found {
                    tracing::debug!(artifact = %artifact, "staged");
                    plan.stage(PlanEntry {
                        destination: artifact.image.on_registry(&job.destination_registry),
                        source: artifact,
                        manifest,
                    });
                }
            }
        }

        plan.stage(PlanEntry {
            source: ArtifactReference::primary(job.source.clone()),
            destination: job.destination(),
            manifest: primary,
        });
        Ok(plan)
    }

    fn push(&self, image: &ImageReference, plan: SyncPlan) -> SyncResult<Vec<ArtifactReference>> {
        let mut pushed = Vec::new();
        let mut failed = Vec::new();
        let mut withheld = Vec::new();

        for entry in plan.into_entries() {
            if entry.source.role == ArtifactRole::PrimaryManifest && !failed.is_empty() {
                tracing::warn!(artifact = %entry.source, "withheld, satellites failed");
                withheld.push(entry.source);
                continue;
            }
            // Anything that appeared since staging was pushed by someone else
            match self.exists(&entry.destination) {
                Ok(true) => {
                    return Err(SyncError::ConsistencyViolation {
                        artifact: entry.source,
                    })
                }
                Ok(false) => {}
                Err(SyncError::Registry { source, .. }) => {
                    tracing::warn!(artifact = %entry.source, error = %source, "destination check failed");
                    failed.push((entry.source, source));
                    continue;
                }
                Err(other) => return Err(other),
            }
            match self.copy_manifest(&entry.source.image, &entry.destination, &entry.manifest, 0) {
                Ok(()) => {
                    tracing::info!(artifact = %entry.source, destination = %entry.destination, "pushed");
                    pushed.push(entry.source);
                }
                Err(SyncError::Registry { source, .. }) => {
                    tracing::warn!(artifact = %entry.source, error = %source, "push failed");
                    failed.push((entry.source, source));
                }
                Err(other) => return Err(other),
            }
        }

        if failed.is_empty() {
            Ok(pushed)
        } else {
            Err(SyncError::PartialFailure {
                image: image.clone(),
                pushed,
                failed,
                withheld,
            })
        }
    }

    /// Copy blobs and child manifests, then put `manifest` at `destination`.
    fn copy_manifest(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
        manifest: &Manifest,
        depth: usize,
    ) -> SyncResult<()> {
        if depth > MAX_MANIFEST_DEPTH {
            return Err(SyncError::NestingTooDeep(source.to_string()));
        }
        if let Reference::Digest(expected) = &destination.reference {
            if expected != &manifest.digest {
                return Err(SyncError::registry(
                    source,
                    RegistryError::DigestMismatch {
                        reference: source.to_string(),
                        expected: expected.to_string(),
                        actual: manifest.digest.to_string(),
                    },
                ));
            }
        }
        let kind = manifest.kind().map_err(|e| SyncError::registry(source, e))?;

        match kind {
            ManifestKind::Index { manifests } => {
                for child in manifests {
                    let child_source = source.with_digest(child.digest.clone());
                    let child_destination = destination.with_digest(child.digest);
                    if self.exists(&child_destination)? {
                        continue;
                    }
                    let child_manifest = self
                        .retry
                        .run("get manifest", || self.client.get_manifest(&child_source))
                        .map_err(|e| SyncError::registry(&child_source, e))?
                        .ok_or_else(|| {
                            SyncError::registry(
                                &child_source,
                                RegistryError::InvalidManifest("index references a missing manifest".to_string()),
                            )
                        })?;
                    self.copy_manifest(&child_source, &child_destination, &child_manifest, depth + 1)?;
                }
            }
            ManifestKind::Image { config, layers } => {
                for blob in std::iter::once(config).chain(layers) {
                    self.copy_blob(source, destination, &blob.digest)?;
                }
            }
        }

        self.retry
            .run("put manifest", || self.client.put_manifest(destination, manifest))
            .map_err(|e| SyncError::registry(destination, e))?;

        Ok(())
    }

    fn copy_blob(&self, source: &ImageReference, destination: &ImageReference, digest: &Digest) -> SyncResult<()> {
        let present = self
            .retry
            .run("check blob", || self.client.blob_exists(destination, digest))
            .map_err(|e| SyncError::registry(digest, e))?;
        if present {
            return Ok(());
        }
        let data = self
            .retry
            .run("get blob", || self.client.get_blob(source, digest))
            .map_err(|e| SyncError::registry(digest, e))?;
        self.retry
            .run("put blob", || self.client.put_blob(destination, digest, data.clone()))
            .map_err(|e| SyncError::registry(digest, e))?;
        tracing::debug!(digest = %digest, destination = %destination, "blob copied");
        Ok(())
    }
}
