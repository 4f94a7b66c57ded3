//! Shared builders for integration tests
//!
//! - In-memory tar and tar.gz archives (deterministic headers)
//! - Helm chart packages with a values file
//! - Registry host names and a git stand-in

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chart_keeper::repo::{GitError, GitRepository};
use chart_keeper::sync::RegistryHosts;
use flate2::write::GzEncoder;
use flate2::Compression;

pub const DOCKER: &str = "docker.io";
pub const STAGING: &str = "stg.example.com";
pub const PRIME: &str = "prime.example.com";

/// Uncompressed tar of `members`, in the given order.
pub fn tar(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Gzipped tar of `members`.
pub fn tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar(members)).unwrap();
    encoder.finish().unwrap()
}

/// A `helm package` style archive: `<name>/Chart.yaml` and
/// `<name>/values.yaml`.
pub fn chart_package(name: &str, version: &str, values: &str) -> Vec<u8> {
    let chart_yaml = format!(
        "apiVersion: v2\nname: {}\nversion: {}\ndescription: {} chart\n",
        name, version, name
    );
    let chart_path = format!("{}/Chart.yaml", name);
    let values_path = format!("{}/values.yaml", name);
    tar_gz(&[
        (chart_path.as_str(), chart_yaml.as_bytes()),
        (values_path.as_str(), values.as_bytes()),
    ])
}

/// Values referencing one image.
pub fn image_values(repository: &str, tag: &str) -> String {
    format!("image:\n  repository: {}\n  tag: {}\n", repository, tag)
}

pub fn hosts() -> RegistryHosts {
    RegistryHosts {
        docker: DOCKER.to_string(),
        staging: STAGING.to_string(),
        prime: PRIME.to_string(),
    }
}

/// Git stand-in that is always dirty and records commits.
#[derive(Debug, Default)]
pub struct RecordingGit {
    pub commits: Mutex<Vec<(Vec<PathBuf>, String)>>,
}

impl RecordingGit {
    pub fn messages(&self) -> Vec<String> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl GitRepository for RecordingGit {
    fn is_clean(&self) -> Result<bool, GitError> {
        Ok(false)
    }

    fn add_and_commit(&self, paths: &[PathBuf], message: &str) -> Result<(), GitError> {
        self.commits
            .lock()
            .unwrap()
            .push((paths.to_vec(), message.to_string()));
        Ok(())
    }
}
