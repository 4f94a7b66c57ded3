//! `dockerToPrime.yaml` / `stagingToPrime.yaml`: repository to tags.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{DiscoveryError, DiscoveryResult};
use crate::repo::Filesystem;

/// Image repository to tags, both sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncManifest(pub BTreeMap<String, BTreeSet<String>>);

impl SyncManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, repository: &str, tag: &str) {
        self.0
            .entry(repository.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of (repository, tag) pairs
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(repo, tags)| tags.iter().map(move |tag| (repo.as_str(), tag.as_str())))
    }

    /// Read a manifest file; a missing file is empty.
    pub fn load(fs: &dyn Filesystem, path: &Path) -> DiscoveryResult<Self> {
        if !fs.exists(path) {
            return Ok(Self::new());
        }
        let data = fs.read(path).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        serde_yaml::from_slice(&data).map_err(|source| DiscoveryError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, fs: &dyn Filesystem, path: &Path) -> DiscoveryResult<()> {
        let yaml = if self.is_empty() {
            String::new()
        } else {
            serde_yaml::to_string(self).map_err(|source| DiscoveryError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
        };
        fs.write(path, yaml.as_bytes()).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::LocalFilesystem;
    use tempfile::TempDir;

    #[test]
    fn test_save_sorted_and_load() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let mut manifest = SyncManifest::new();
        manifest.insert("rancher/shell", "v0.2.0");
        manifest.insert("rancher/fleet", "v2.0.0");
        manifest.insert("rancher/fleet", "v1.0.0");

        manifest.save(&fs, Path::new("stagingToPrime.yaml")).unwrap();
        let text = std::fs::read_to_string(dir.path().join("stagingToPrime.yaml")).unwrap();
        assert_eq!(text, "rancher/fleet:\n- v1.0.0\n- v2.0.0\nrancher/shell:\n- v0.2.0\n");

        let loaded = SyncManifest::load(&fs, Path::new("stagingToPrime.yaml")).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn test_empty_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        SyncManifest::new().save(&fs, Path::new("dockerToPrime.yaml")).unwrap();
        assert!(SyncManifest::load(&fs, Path::new("dockerToPrime.yaml")).unwrap().is_empty());
        assert!(SyncManifest::load(&fs, Path::new("missing.yaml")).unwrap().is_empty());
    }
}
