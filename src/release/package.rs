//! The packaging collaborator.

use std::fs;
use std::path::{Path, PathBuf};

use crate::repo::ChartLoader;

/// Packaging failure reported by a [`ChartPackager`]
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PackageError(pub String);

/// Produces the packaged archive of one chart version.
pub trait ChartPackager: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn package(&self) -> Result<Vec<u8>, PackageError>;
}

/// A package already built by `helm package`.
#[derive(Debug, Clone)]
pub struct FilePackage {
    path: PathBuf,
    name: String,
    version: String,
}

impl FilePackage {
    /// Read the chart identity from the package at `path`.
    pub fn open(path: &Path, loader: &dyn ChartLoader) -> Result<Self, PackageError> {
        let data = fs::read(path).map_err(|e| PackageError(format!("{}: {}", path.display(), e)))?;
        let chart = loader
            .load(&data)
            .map_err(|e| PackageError(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            name: chart.name,
            version: chart.version,
        })
    }
}

impl ChartPackager for FilePackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn package(&self) -> Result<Vec<u8>, PackageError> {
        fs::read(&self.path).map_err(|e| PackageError(format!("{}: {}", self.path.display(), e)))
    }
}
