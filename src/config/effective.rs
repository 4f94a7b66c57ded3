//! Effective settings with provenance
//!
//! Records which sources contributed to the merged settings, with a digest
//! of every file that was read.

use std::fs;
use std::path::Path;

use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::Settings;
use super::merge::merge_layers;

/// Repo config file name, looked up at the repository root
pub const REPO_CONFIG_FILE: &str = ".chart-keeper.toml";

/// Keys that would hold secret values
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "credential"];

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Repo,
    Cli,
}

/// A contributing source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged, validated settings and where they came from
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub settings: Settings,
    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Merge built-in defaults, the repo file (if it exists) and CLI overrides
    pub fn build(repo_config_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![Settings::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = repo_config_path.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Repo,
                path: Some(path.display().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        reject_secrets(&merged, "")?;

        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        validate(&settings)?;

        tracing::debug!(sources = sources.len(), "configuration loaded");
        Ok(Self { settings, sources })
    }

    /// Load `.chart-keeper.toml` from a repository root
    pub fn for_repository(root: &Path, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        Self::build(Some(&root.join(REPO_CONFIG_FILE)), cli_overrides)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
    let table: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

    Ok((toml_to_json(table), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Credentials are read from the environment; only variable names
/// (`*_env` keys) may appear in configuration.
fn reject_secrets(value: &Value, path: &str) -> Result<(), ConfigError> {
    if let Value::Object(map) = value {
        for (key, val) in map {
            let current = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            let lower = key.to_lowercase();
            if !lower.ends_with("_env") && SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                return Err(ConfigError::ValidationError(format!(
                    "{} looks like a secret; store it in an environment variable and reference it with a *_env key",
                    current
                )));
            }
            reject_secrets(val, &current)?;
        }
    }
    Ok(())
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.release.workers == 0 {
        return Err(ConfigError::ValidationError(
            "release.workers must be greater than 0".to_string(),
        ));
    }
    if settings.versioning.allowed_prerelease_ids.allowed().is_empty() {
        return Err(ConfigError::ValidationError(
            "versioning.allowed_prerelease_ids must not be empty".to_string(),
        ));
    }
    if settings.registries.timeout_seconds == 0 {
        return Err(ConfigError::ValidationError(
            "registries.timeout_seconds must be greater than 0".to_string(),
        ));
    }
    for pattern in &settings.images.deny_list {
        let (repository, tag) = pattern.rsplit_once(':').ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "images.deny_list entry {:?} must be <repository glob>:<tag glob>",
                pattern
            ))
        })?;
        for glob in [repository, tag] {
            Glob::new(glob).map_err(|e| {
                ConfigError::ValidationError(format!("images.deny_list entry {:?}: {}", pattern, e))
            })?;
        }
    }
    for entry in &settings.release.republish {
        if !entry.contains(':') {
            return Err(ConfigError::ValidationError(format!(
                "release.republish entry {:?} must be <chart>:<version>",
                entry
            )));
        }
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
