//! Collaborators at the edge of the repository
//!
//! Narrow interfaces over the filesystem, chart archives, upstream archive
//! downloads and git, each with a local implementation.

mod chart;
mod fetch;
mod fs;
mod git;

pub use chart::{ChartArchive, ChartError, ChartLoader, TgzChartLoader};
pub use fetch::{ArchiveFetcher, FetchError, HttpArchiveFetcher};
pub use fs::{Filesystem, LocalFilesystem};
pub use git::{GitCli, GitError, GitRepository};
