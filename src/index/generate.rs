//! Building an index from the packaged charts in the asset store.

use std::path::Path;

use chrono::{DateTime, Utc};
use keeper_oci::Digest;

use super::{ChartVersion, IndexError, IndexResult, RepositoryIndex};
use crate::repo::{ChartLoader, Filesystem};

/// Scans `assets_dir` for `*.tgz` chart packages.
pub struct IndexGenerator<'a> {
    fs: &'a dyn Filesystem,
    loader: &'a dyn ChartLoader,
}

impl<'a> IndexGenerator<'a> {
    pub fn new(fs: &'a dyn Filesystem, loader: &'a dyn ChartLoader) -> Self {
        Self { fs, loader }
    }

    /// Index every package under `assets_dir`, stamped with `now`.
    ///
    /// URLs are the package paths relative to the repository root. The
    /// result is not sorted; reconciliation sorts.
    pub fn generate(&self, assets_dir: &Path, now: DateTime<Utc>) -> IndexResult<RepositoryIndex> {
        let mut index = RepositoryIndex::new(now);
        if !self.fs.exists(assets_dir) {
            tracing::warn!(path = %assets_dir.display(), "asset directory does not exist");
            return Ok(index);
        }

        let packages = self.fs.walk(assets_dir).map_err(|source| IndexError::Io {
            path: assets_dir.to_path_buf(),
            source,
        })?;

        for path in packages.iter().filter(|p| p.extension().is_some_and(|e| e == "tgz")) {
            let data = self.fs.read(path).map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;
            let chart = self.loader.load(&data).map_err(|source| IndexError::Chart {
                path: path.clone(),
                source,
            })?;

            if index.contains(&chart.name, &chart.version) {
                return Err(IndexError::DuplicateVersion {
                    chart: chart.name,
                    version: chart.version,
                });
            }

            tracing::debug!(chart = %chart.name, version = %chart.version, path = %path.display(), "indexed package");
            index.insert(ChartVersion {
                name: chart.name,
                version: chart.version,
                digest: Digest::sha256(&data).encoded().to_string(),
                created: now,
                urls: vec![url_for(path)],
                metadata: chart.metadata,
            });
        }
        Ok(index)
    }
}

fn url_for(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{LocalFilesystem, TgzChartLoader};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn package(name: &str, version: &str) -> Vec<u8> {
        let chart_yaml = format!("apiVersion: v2\nname: {name}\nversion: {version}\nappVersion: 1.0.0\n");
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(chart_yaml.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{name}/Chart.yaml"), chart_yaml.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_generate_from_assets() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let bytes = package("fleet", "104.0.0+up0.9.0");
        fs.write(Path::new("assets/fleet/fleet-104.0.0+up0.9.0.tgz"), &bytes).unwrap();
        fs.write(Path::new("assets/README.md"), b"not a chart").unwrap();

        let loader = TgzChartLoader;
        let index = IndexGenerator::new(&fs, &loader)
            .generate(Path::new("assets"), Utc::now())
            .unwrap();

        assert_eq!(index.len(), 1);
        let chart = index.get("fleet", "104.0.0+up0.9.0").unwrap();
        assert_eq!(chart.digest, Digest::sha256(&bytes).encoded());
        assert_eq!(chart.urls, vec!["assets/fleet/fleet-104.0.0+up0.9.0.tgz"]);
        assert_eq!(chart.metadata["appVersion"], serde_yaml::Value::from("1.0.0"));
    }

    #[test]
    fn test_duplicate_package_rejected() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        fs.write(Path::new("assets/a/fleet-1.0.0.tgz"), &package("fleet", "1.0.0")).unwrap();
        fs.write(Path::new("assets/b/fleet-1.0.0.tgz"), &package("fleet", "1.0.0")).unwrap();

        let loader = TgzChartLoader;
        let err = IndexGenerator::new(&fs, &loader)
            .generate(Path::new("assets"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, IndexError::DuplicateVersion { .. }));
    }

    #[test]
    fn test_missing_assets_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let loader = TgzChartLoader;
        let index = IndexGenerator::new(&fs, &loader)
            .generate(Path::new("assets"), Utc::now())
            .unwrap();
        assert!(index.is_empty());
    }
}
