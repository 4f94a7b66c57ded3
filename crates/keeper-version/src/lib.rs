//! Chart version ordering.
//!
//! Chart versions carry the packaged upstream version in their semver build
//! metadata, e.g. `108.0.0+up0.14.0-rc.1`. Plain semver ignores build metadata
//! when ordering, so two packages of the same chart version built from
//! different upstream prereleases would compare equal. This crate layers a
//! prerelease channel (stable > rc > beta > alpha by default) on top of the
//! semver base and exposes a descending total order used for index listings
//! and release gating.

mod ordering;
mod scheme;
mod standards;

pub use ordering::{ParsedVersion, VersionOrdering};
pub use scheme::{Channel, PrereleaseScheme, DEFAULT_PRERELEASE_ORDER};
pub use standards::{VersionStandards, DEFAULT_ALLOWED_PRERELEASE_IDS};

/// Errors raised while configuring or validating versions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid prerelease scheme: {0}")]
    InvalidScheme(String),

    #[error("chart {chart} version {version}: base is not a semantic version")]
    InvalidBase { chart: String, version: String },

    #[error("chart {chart} version {version}: malformed build metadata")]
    MalformedBuildMetadata { chart: String, version: String },

    #[error("chart {chart} version {version}: prerelease identifier {identifier:?} is not allowed")]
    DisallowedPrerelease {
        chart: String,
        version: String,
        identifier: String,
    },
}

/// Split a raw version into `(base, build metadata)`.
///
/// Returns `None` for the metadata when there is no `+` or when the string
/// splits into more than two parts.
pub fn split_build_metadata(raw: &str) -> (&str, Option<&str>) {
    let mut parts = raw.splitn(3, '+');
    let base = parts.next().unwrap_or_default();
    let metadata = parts.next();
    if parts.next().is_some() {
        return (base, None);
    }
    (base, metadata)
}

/// Parse the semver base of a chart version.
///
/// Accepts a leading `v` and missing minor/patch components (`1`, `1.2`),
/// which charts in the wild do use.
pub fn parse_base(base: &str) -> Option<semver::Version> {
    let trimmed = base.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if let Ok(version) = semver::Version::parse(trimmed) {
        return Some(version);
    }

    let (core, pre) = match trimmed.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (trimmed, None),
    };
    let mut fields: Vec<&str> = core.split('.').collect();
    if fields.len() > 3
        || fields
            .iter()
            .any(|f| f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    while fields.len() < 3 {
        fields.push("0");
    }

    let mut padded = fields.join(".");
    if let Some(pre) = pre {
        padded.push('-');
        padded.push_str(pre);
    }
    semver::Version::parse(&padded).ok()
}
