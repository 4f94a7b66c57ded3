//! Version-standards check applied before a generated index is accepted.

use serde::{Deserialize, Serialize};

use crate::{parse_base, VersionError};

/// Prerelease identifiers accepted by default.
pub const DEFAULT_ALLOWED_PRERELEASE_IDS: &[&str] = &["-alpha.", "-beta.", "-rc.", "-rancher."];

/// Allow-list of prerelease identifiers that may appear in build metadata.
///
/// A build metadata string either carries no `-` at all (a plain upstream
/// version such as `up0.14.0`) or its suffix from the first `-` must be one
/// allowed identifier followed by a number, e.g. `-rc.3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionStandards {
    allowed: Vec<String>,
}

impl VersionStandards {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Check one chart version against the standards.
    pub fn check(&self, chart: &str, version: &str) -> Result<(), VersionError> {
        let mut parts = version.split('+');
        let base = parts.next().unwrap_or_default();
        let metadata = parts.next();
        if parts.next().is_some() || metadata == Some("") {
            return Err(VersionError::MalformedBuildMetadata {
                chart: chart.to_string(),
                version: version.to_string(),
            });
        }

        if parse_base(base).is_none() {
            return Err(VersionError::InvalidBase {
                chart: chart.to_string(),
                version: version.to_string(),
            });
        }

        let Some(metadata) = metadata else {
            return Ok(());
        };
        let Some(dash) = metadata.find('-') else {
            return Ok(());
        };
        let suffix = &metadata[dash..];

        let accepted = self.allowed.iter().any(|id| {
            suffix
                .strip_prefix(id.as_str())
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        });
        if accepted {
            Ok(())
        } else {
            Err(VersionError::DisallowedPrerelease {
                chart: chart.to_string(),
                version: version.to_string(),
                identifier: suffix.to_string(),
            })
        }
    }
}

impl Default for VersionStandards {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALLOWED_PRERELEASE_IDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}
