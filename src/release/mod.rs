//! Release gating
//!
//! Decides per chart version whether its package is exported, kept as is,
//! or refused because it would change an already released chart. Also
//! checks packaged charts against their upstream release and drives the
//! release pipeline that ends in a git commit.

mod drift;
mod gate;
mod package;
mod pipeline;

use std::io;
use std::path::PathBuf;

use crate::archive::ArchiveError;
use crate::error::BatchError;
use crate::index::IndexError;
use crate::repo::{FetchError, GitError};

pub use drift::DriftChecker;
pub use gate::{ReleaseDecision, ReleaseGate, ReleaseOutcome};
pub use package::{ChartPackager, FilePackage, PackageError};
pub use pipeline::{PipelineReport, ReleasePipeline};

/// Release result type
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// Errors from release gating and the release pipeline
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("failed to package {chart}: {source}")]
    Package {
        chart: String,
        #[source]
        source: PackageError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot compare {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error("chart {chart} version {version} is already released and its content changed; bump the version or list it under release.republish")]
    ModifiedReleasedChart { chart: String, version: String },

    #[error("upstream fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("git: {0}")]
    Git(#[from] GitError),

    #[error("{0}")]
    Batch(BatchError<ReleaseError>),

    #[error("release cancelled")]
    Cancelled,
}

impl ReleaseError {
    pub fn is_consistency_violation(&self) -> bool {
        match self {
            ReleaseError::ModifiedReleasedChart { .. } => true,
            ReleaseError::Index(err) => err.is_consistency_violation(),
            ReleaseError::Batch(batch) => batch.failures().iter().any(|(_, e)| e.is_consistency_violation()),
            _ => false,
        }
    }
}
