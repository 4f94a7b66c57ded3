//! Index data model, serialized in Helm's `index.yaml` layout.

use std::collections::BTreeMap;

use std::path::Path;

use chrono::{DateTime, Utc};
use keeper_version::VersionOrdering;
use serde::{Deserialize, Serialize};

use super::{IndexError, IndexResult};
use crate::repo::Filesystem;

/// `apiVersion` written to every index
pub const INDEX_API_VERSION: &str = "v1";

/// One packaged chart version as listed in the index.
///
/// Identity is `(name, version)`. Chart.yaml fields other than name and
/// version are carried through untouched in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartVersion {
    pub name: String,
    pub version: String,
    /// sha256 of the packaged archive, hex encoded
    pub digest: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_yaml::Value>,
}

/// A Helm repository index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    pub api_version: String,
    /// Chart name to versions, newest first
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
    pub generated: DateTime<Utc>,
    /// Unknown top-level keys (e.g. `serverInfo`) are preserved
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl RepositoryIndex {
    pub fn new(generated: DateTime<Utc>) -> Self {
        Self {
            api_version: INDEX_API_VERSION.to_string(),
            entries: BTreeMap::new(),
            generated,
            extra: BTreeMap::new(),
        }
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(data)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Read an index file; `None` when it does not exist.
    pub fn read(fs: &dyn Filesystem, path: &Path) -> IndexResult<Option<Self>> {
        if !fs.exists(path) {
            return Ok(None);
        }
        let data = fs.read(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&data).map(Some).map_err(|source| IndexError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Add a version, replacing one with the same identity.
    pub fn insert(&mut self, chart: ChartVersion) {
        let versions = self.entries.entry(chart.name.clone()).or_default();
        match versions.iter_mut().find(|v| v.version == chart.version) {
            Some(existing) => *existing = chart,
            None => versions.push(chart),
        }
    }

    pub fn get(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        self.entries
            .get(name)?
            .iter()
            .find(|v| v.version == version)
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.get(name, version).is_some()
    }

    /// All versions in entry order
    pub fn iter(&self) -> impl Iterator<Item = &ChartVersion> {
        self.entries.values().flatten()
    }

    /// Number of chart versions
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sort every entry newest first; drops empty entries.
    pub fn sort(&mut self, ordering: &VersionOrdering) {
        self.entries.retain(|_, versions| !versions.is_empty());
        for versions in self.entries.values_mut() {
            ordering.sort_by_version(versions, |v| v.version.as_str());
        }
    }
}
