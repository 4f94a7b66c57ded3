//! Image discovery
//!
//! Charts declare their images in values files as mappings with
//! `repository` and `tag` keys. Discovery collects them from the packaged
//! charts and partitions them by where they can be copied from.

mod deny;
mod discover;
mod extract;
mod manifest;
mod value;

use std::io;
use std::path::PathBuf;

use keeper_oci::RegistryError;

use crate::error::BatchError;
use crate::repo::ChartError;

pub use deny::DenyList;
pub use discover::{collect_images, ImageDiscovery, SyncPartition};
pub use extract::{ImageExtractor, ImageRef};
pub use manifest::SyncManifest;
pub use value::{ValueNode, Visitor};

/// Discovery result type
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors from image discovery
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot load chart archive {path}: {source}")]
    Chart {
        path: PathBuf,
        #[source]
        source: ChartError,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid deny-list pattern {pattern:?}: {reason}")]
    DenyPattern { pattern: String, reason: String },

    #[error("tag listing failed: {0}")]
    Registry(BatchError<RegistryError>),

    #[error("discovery cancelled")]
    Cancelled,
}
