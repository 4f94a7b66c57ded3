//! Prerelease channels encoded in build metadata.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::VersionError;

/// Default prerelease identifiers, lowest precedence first.
pub const DEFAULT_PRERELEASE_ORDER: &[&str] = &["-alpha.", "-beta.", "-rc."];

/// Release channel of a chart version.
///
/// `Stable` outranks every prerelease. Prereleases compare by the rank of
/// their identifier in the scheme, then by their numeric suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Prerelease { rank: usize, number: u64 },
    Stable,
}

impl Channel {
    pub fn is_stable(&self) -> bool {
        matches!(self, Channel::Stable)
    }
}

impl Ord for Channel {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Channel::Stable, Channel::Stable) => Ordering::Equal,
            (Channel::Stable, Channel::Prerelease { .. }) => Ordering::Greater,
            (Channel::Prerelease { .. }, Channel::Stable) => Ordering::Less,
            (
                Channel::Prerelease { rank: a, number: x },
                Channel::Prerelease { rank: b, number: y },
            ) => a.cmp(b).then(x.cmp(y)),
        }
    }
}

impl PartialOrd for Channel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered list of prerelease identifiers searched in build metadata.
///
/// Identifiers are listed lowest precedence first and are also the search
/// priority: the first identifier found in the metadata wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct PrereleaseScheme {
    identifiers: Vec<String>,
}

impl PrereleaseScheme {
    /// Build a scheme from identifiers such as `-alpha.`.
    pub fn new(identifiers: Vec<String>) -> Result<Self, VersionError> {
        if identifiers.is_empty() {
            return Err(VersionError::InvalidScheme(
                "at least one prerelease identifier is required".to_string(),
            ));
        }
        for id in &identifiers {
            if id.len() < 3 || !id.starts_with('-') || !id.ends_with('.') {
                return Err(VersionError::InvalidScheme(format!(
                    "identifier {:?} must look like \"-name.\"",
                    id
                )));
            }
        }
        Ok(Self { identifiers })
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Classify build metadata into a channel.
    pub fn classify(&self, build_metadata: Option<&str>) -> Channel {
        let Some(metadata) = build_metadata else {
            return Channel::Stable;
        };

        for (idx, id) in self.identifiers.iter().enumerate() {
            if let Some(pos) = metadata.find(id.as_str()) {
                let suffix = &metadata[pos + id.len()..];
                return Channel::Prerelease {
                    rank: idx + 1,
                    number: leading_number(suffix),
                };
            }
        }
        Channel::Stable
    }
}

impl Default for PrereleaseScheme {
    fn default() -> Self {
        Self {
            identifiers: DEFAULT_PRERELEASE_ORDER.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for PrereleaseScheme {
    type Error = VersionError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PrereleaseScheme> for Vec<String> {
    fn from(value: PrereleaseScheme) -> Self {
        value.identifiers
    }
}

fn leading_number(s: &str) -> u64 {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}
