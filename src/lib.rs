//! chart-keeper
//!
//! Never-overwrite publishing of a Helm chart repository and the container
//! images its charts reference:
//!
//! - [`archive`]: content comparison of nested tar/gzip archives
//! - [`index`]: generation and reconciliation of `index.yaml`
//! - [`release`]: per-version export decisions and the release pipeline
//! - [`images`]: image discovery from chart values
//! - [`sync`]: cross-registry image replication
//!
//! Version ordering lives in the `keeper-version` crate and registry wire
//! types in `keeper-oci`.

pub mod archive;
pub mod cancel;
pub mod config;
pub mod error;
pub mod images;
pub mod index;
pub mod logging;
pub mod mock;
pub mod pool;
pub mod release;
pub mod repo;
pub mod sync;

pub use archive::{ArchiveComparator, ArchiveError, ComparisonReport};
pub use cancel::CancelToken;
pub use config::{ConfigError, EffectiveConfig, Settings};
pub use error::BatchError;
pub use index::{DigestPolicy, IndexError, IndexReconciler, RepositoryIndex};
pub use pool::WorkerPool;
pub use release::{ReleaseError, ReleaseGate};
pub use sync::{RegistryClient, RegistrySynchronizer, SyncError};

pub use keeper_oci;
pub use keeper_version;
