//! Loading packaged charts.

use std::collections::BTreeMap;
use std::io::{self, Read};

use serde::Deserialize;

use crate::archive;

/// Errors while loading a chart archive
#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid Chart.yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("archive has no Chart.yaml at its top level")]
    MissingChartYaml,
}

/// A packaged chart: declared identity plus its files.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartArchive {
    pub name: String,
    pub version: String,
    /// Remaining Chart.yaml fields (apiVersion, appVersion, description, ...)
    pub metadata: BTreeMap<String, serde_yaml::Value>,
    /// Files keyed by path below the chart's top-level directory
    pub files: BTreeMap<String, Vec<u8>>,
}

impl ChartArchive {
    /// Files whose name is `values.yaml`, including those of subcharts.
    pub fn values_files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files
            .iter()
            .filter(|(path, _)| path.rsplit('/').next() == Some("values.yaml"))
            .map(|(path, data)| (path.as_str(), data.as_slice()))
    }
}

#[derive(Deserialize)]
struct ChartYaml {
    name: String,
    version: String,
    #[serde(flatten)]
    rest: BTreeMap<String, serde_yaml::Value>,
}

/// Reads a chart's identity and files from archive bytes.
pub trait ChartLoader: Send + Sync {
    fn load(&self, archive: &[u8]) -> Result<ChartArchive, ChartError>;
}

/// Loader for `helm package` output (`<chart>/Chart.yaml` inside a tgz).
#[derive(Debug, Clone, Copy, Default)]
pub struct TgzChartLoader;

impl ChartLoader for TgzChartLoader {
    fn load(&self, bytes: &[u8]) -> Result<ChartArchive, ChartError> {
        let mut tar = archive::open(bytes)?;
        let mut files = BTreeMap::new();
        let mut chart_yaml: Option<Vec<u8>> = None;

        for entry in tar.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.to_string_lossy().trim_start_matches("./").to_string();
            let Some((_, inner)) = path.split_once('/') else {
                continue;
            };
            let inner = inner.to_string();

            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            if inner == "Chart.yaml" {
                chart_yaml = Some(data.clone());
            }
            files.insert(inner, data);
        }

        let raw = chart_yaml.ok_or(ChartError::MissingChartYaml)?;
        let parsed: ChartYaml = serde_yaml::from_slice(&raw)?;

        Ok(ChartArchive {
            name: parsed.name,
            version: parsed.version,
            metadata: parsed.rest,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::{Builder, Header};

    fn package(members: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (path, data) in members {
            let mut header = Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, data.as_bytes()).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tar).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn test_oversized_member_is_an_error() {
        let mut header = Header::new_gnu();
        header.set_path("fleet/values.yaml").unwrap();
        header.set_size(1 << 63);
        header.set_mode(0o644);
        header.set_cksum();
        let mut tar = header.as_bytes().to_vec();
        tar.extend_from_slice(b"tag: v1\n");
        tar.resize(tar.len() + 1024, 0);

        assert!(TgzChartLoader.load(&tar).is_err());
    }

    #[test]
    fn test_load_chart() {
        let bytes = package(&[
            ("fleet/Chart.yaml", "apiVersion: v2\nname: fleet\nversion: 105.0.0+up0.11.0\nappVersion: 0.11.0\n"),
            ("fleet/values.yaml", "image:\n  repository: rancher/fleet\n  tag: v0.11.0\n"),
            ("fleet/charts/gitjob/values.yaml", "tag: x\n"),
            ("fleet/templates/deploy.yaml", "kind: Deployment\n"),
        ]);

        let chart = TgzChartLoader.load(&bytes).unwrap();
        assert_eq!(chart.name, "fleet");
        assert_eq!(chart.version, "105.0.0+up0.11.0");
        assert_eq!(
            chart.metadata.get("appVersion").and_then(|v| v.as_str()),
            Some("0.11.0")
        );
        let values: Vec<&str> = chart.values_files().map(|(p, _)| p).collect();
        assert_eq!(values, vec!["charts/gitjob/values.yaml", "values.yaml"]);
    }

    #[test]
    fn test_missing_chart_yaml() {
        let bytes = package(&[("fleet/values.yaml", "a: 1\n")]);
        assert!(matches!(TgzChartLoader.load(&bytes), Err(ChartError::MissingChartYaml)));
    }
}
