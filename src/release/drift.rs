//! Comparing local packages against their upstream release.

use std::path::Path;

use super::{ReleaseError, ReleaseResult};
use crate::archive::{ArchiveComparator, ComparisonReport};
use crate::repo::{ArchiveFetcher, Filesystem};

/// Detects packages whose content differs from the upstream archive of the
/// same name.
pub struct DriftChecker<'a> {
    fetcher: &'a dyn ArchiveFetcher,
    comparator: ArchiveComparator,
}

impl<'a> DriftChecker<'a> {
    pub fn new(fetcher: &'a dyn ArchiveFetcher) -> Self {
        Self {
            fetcher,
            comparator: ArchiveComparator::new(),
        }
    }

    /// Compare `local` with upstream `name`. `None` when upstream has no
    /// archive of that name.
    pub fn check(&self, name: &str, local: &[u8]) -> ReleaseResult<Option<ComparisonReport>> {
        let Some(upstream) = self.fetcher.fetch(name)? else {
            tracing::info!(archive = name, "not released upstream");
            return Ok(None);
        };
        let report = self
            .comparator
            .compare(local, upstream.as_slice())
            .map_err(|source| ReleaseError::Archive {
                path: name.into(),
                source,
            })?;
        if report.is_equal() {
            tracing::debug!(archive = name, "matches upstream");
        } else {
            tracing::warn!(archive = name, discrepancies = report.len(), "differs from upstream");
        }
        Ok(Some(report))
    }

    /// Check the package at `path`, named upstream by its file name.
    pub fn check_asset(&self, fs: &dyn Filesystem, path: &Path) -> ReleaseResult<Option<ComparisonReport>> {
        let local = fs.read(path).map_err(|source| ReleaseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.check(&name, &local)
    }
}
