//! Descending total order over chart version strings.

use std::cmp::{Ordering, Reverse};

use crate::scheme::{Channel, PrereleaseScheme};
use crate::{parse_base, split_build_metadata};

/// A chart version broken into the parts that determine its precedence.
///
/// `Ord` is ascending precedence: an unparseable base is lowest, then semver
/// base, then channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsedVersion {
    pub base: Option<semver::Version>,
    pub channel: Channel,
}

/// Orders chart versions newest first.
#[derive(Debug, Clone, Default)]
pub struct VersionOrdering {
    scheme: PrereleaseScheme,
}

impl VersionOrdering {
    pub fn new(scheme: PrereleaseScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> &PrereleaseScheme {
        &self.scheme
    }

    pub fn parse(&self, raw: &str) -> ParsedVersion {
        let (base, metadata) = split_build_metadata(raw);
        ParsedVersion {
            base: parse_base(base),
            channel: self.scheme.classify(metadata),
        }
    }

    /// Compare two versions for a descending listing.
    ///
    /// `Ordering::Less` means `a` is listed before `b`. Two stable versions
    /// with the same base compare equal.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.parse(b).cmp(&self.parse(a))
    }

    /// Whether `a` must be listed before `b`.
    pub fn sorts_before(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// Return a sorted copy, newest first. Ties keep their input order.
    pub fn sorted<S: AsRef<str> + Clone>(&self, versions: &[S]) -> Vec<S> {
        let mut copy = versions.to_vec();
        self.sort_by_version(&mut copy, |v| v.as_ref());
        copy
    }

    /// Sort items newest first by the version string `key` extracts.
    pub fn sort_by_version<T, F>(&self, items: &mut [T], key: F)
    where
        F: Fn(&T) -> &str,
    {
        items.sort_by_cached_key(|item| Reverse(self.parse(key(item))));
    }

    /// The newest of `versions`, if any.
    pub fn latest<'a>(&self, versions: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        versions
            .into_iter()
            .min_by(|a, b| self.compare(a, b))
    }
}
