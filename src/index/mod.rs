//! Helm repository index
//!
//! The index is generated from the asset store, reconciled against the
//! published `index.yaml` and written back only when something changed.

mod generate;
mod lock;
mod model;
mod reconcile;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;
use crate::repo::ChartError;
use keeper_version::VersionError;

pub use generate::IndexGenerator;
pub use lock::IndexLock;
pub use model::{ChartVersion, RepositoryIndex, INDEX_API_VERSION};
pub use reconcile::{IndexReconciler, IndexUpdate, Reconciliation};

/// What reconciliation does when a recorded version's digest changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestPolicy {
    /// Accept the new digest and list the entry as modified
    #[default]
    Report,
    /// Refuse with [`IndexError::DigestDrift`]
    Reject,
}

/// Index result type
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors from index generation and reconciliation
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid index {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize index: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("cannot load chart archive {path}: {source}")]
    Chart {
        path: PathBuf,
        #[source]
        source: ChartError,
    },

    #[error("chart {chart} version {version} is packaged more than once")]
    DuplicateVersion { chart: String, version: String },

    #[error("version standards check failed: {0}")]
    NonStandardVersions(BatchError<VersionError>),

    #[error("chart {chart} version {version} was already published with digest {stored}, now {generated}")]
    DigestDrift {
        chart: String,
        version: String,
        stored: String,
        generated: String,
    },
}

impl IndexError {
    /// A published version changed underneath the index
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, IndexError::DigestDrift { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IndexError::NonStandardVersions(_) | IndexError::DuplicateVersion { .. }
        )
    }
}
