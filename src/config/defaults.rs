//! Typed settings and their built-in defaults (layer 1)

use std::path::PathBuf;
use std::time::Duration;

use keeper_version::{PrereleaseScheme, VersionOrdering, VersionStandards};
use serde::{Deserialize, Serialize};

use crate::index::{DigestPolicy, IndexReconciler};
use crate::pool::DEFAULT_WORKERS;

/// All settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub versioning: VersioningSettings,
    pub registries: RegistrySettings,
    pub images: ImageSettings,
    pub release: ReleaseSettings,
}

/// Repository-relative file locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Packaged chart archives (default: "assets")
    pub assets_dir: PathBuf,
    /// Published Helm repository index (default: "index.yaml")
    pub index_file: PathBuf,
    /// Images to copy from Docker Hub (default: "dockerToPrime.yaml")
    pub docker_manifest: PathBuf,
    /// Images to copy from staging (default: "stagingToPrime.yaml")
    pub staging_manifest: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            index_file: PathBuf::from("index.yaml"),
            docker_manifest: PathBuf::from("dockerToPrime.yaml"),
            staging_manifest: PathBuf::from("stagingToPrime.yaml"),
        }
    }
}

/// Version ordering and standards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningSettings {
    /// Prerelease identifiers, lowest precedence first
    pub prerelease_order: PrereleaseScheme,
    /// Identifiers accepted by the version-standards check
    pub allowed_prerelease_ids: VersionStandards,
    /// What reconciliation does when a recorded digest changes
    pub digest_policy: DigestPolicy,
}

/// One registry and where its credentials come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl RegistryEndpoint {
    pub fn new(host: &str, username_env: &str, password_env: &str) -> Self {
        Self {
            host: host.to_string(),
            username_env: Some(username_env.to_string()),
            password_env: Some(password_env.to_string()),
        }
    }
}

/// Registry endpoints and network behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub docker: RegistryEndpoint,
    pub staging: RegistryEndpoint,
    pub prime: RegistryEndpoint,
    /// Per-request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Retries after HTTP 429 (default: 3)
    pub rate_limit_retries: u32,
    /// First backoff delay in milliseconds (default: 1000)
    pub retry_initial_delay_ms: u64,
    /// Backoff cap in milliseconds (default: 16000)
    pub retry_max_delay_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            docker: RegistryEndpoint::new("docker.io", "DOCKER_USERNAME", "DOCKER_PASSWORD"),
            staging: RegistryEndpoint::new(
                "stgregistry.suse.com",
                "STAGING_USERNAME",
                "STAGING_PASSWORD",
            ),
            prime: RegistryEndpoint::new("registry.rancher.com", "PRIME_USERNAME", "PRIME_PASSWORD"),
            timeout_seconds: 30,
            rate_limit_retries: 3,
            retry_initial_delay_ms: 1000,
            retry_max_delay_ms: 16000,
        }
    }
}

impl RegistrySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Image discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Only repositories with one of these prefixes are synced (default: ["rancher/"])
    pub repository_prefixes: Vec<String>,
    /// `<repository glob>:<tag glob>` pairs never synced (default: ["rancher/*:latest"])
    pub deny_list: Vec<String>,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            repository_prefixes: vec!["rancher/".to_string()],
            deny_list: vec!["rancher/*:latest".to_string()],
        }
    }
}

/// Release gating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// Concurrent package jobs (default: 5)
    pub workers: usize,
    /// Highest chart major version released from this branch; larger majors
    /// are forward-ports (default: none)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_line: Option<u64>,
    /// `name:version` pairs allowed to change content after release
    pub republish: Vec<String>,
    /// Base URL of the upstream chart repository for drift checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            branch_line: None,
            republish: Vec::new(),
            upstream_url: None,
        }
    }
}

impl Settings {
    /// Version ordering with the configured prerelease scheme
    pub fn ordering(&self) -> VersionOrdering {
        VersionOrdering::new(self.versioning.prerelease_order.clone())
    }

    /// Index reconciler with the configured ordering, standards and policy
    pub fn reconciler(&self) -> IndexReconciler {
        IndexReconciler::new(
            self.ordering(),
            self.versioning.allowed_prerelease_ids.clone(),
            self.versioning.digest_policy,
        )
    }

    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
