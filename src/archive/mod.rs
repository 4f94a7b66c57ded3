//! Content comparison of tar/gzip archives
//!
//! Two archives are equal when they hold the same regular files with the same
//! content, regardless of member order, timestamps, modes or directory
//! entries. Members named `*.tgz`, `*.tar.gz` or `*.tar` are themselves
//! archives (charts bundle their CRDs this way) and are compared recursively.

mod report;

pub use report::{ComparisonReport, Discrepancy};

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, BufReader, Read};

use sha2::{Digest, Sha256};
use tar::Archive;

/// Gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Nesting depth beyond which an archive is rejected
pub const MAX_NESTING_DEPTH: usize = 8;

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors for archive operations
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unreadable archive: {0}")]
    Unreadable(#[from] io::Error),

    #[error("archives nested deeper than {0} levels")]
    DepthExceeded(usize),
}

/// Open a byte stream as a tar archive, gunzipping when it starts with the
/// gzip magic.
pub fn open<'a, R: Read + 'a>(reader: R) -> io::Result<Archive<Box<dyn Read + 'a>>> {
    let mut buffered = BufReader::new(reader);
    let is_gzip = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    let stream: Box<dyn Read + 'a> = if is_gzip {
        Box::new(flate2::bufread::MultiGzDecoder::new(buffered))
    } else {
        Box::new(buffered)
    };
    Ok(Archive::new(stream))
}

/// Whether a member path names a nested archive.
pub fn is_nested_archive(path: &str) -> bool {
    path.ends_with(".tgz") || path.ends_with(".tar.gz") || path.ends_with(".tar")
}

/// What a regular member contributes to equality.
#[derive(Debug)]
enum Member {
    Hash(String),
    Nested(Vec<u8>),
}

/// Compares archives by content.
#[derive(Debug, Clone)]
pub struct ArchiveComparator {
    max_depth: usize,
}

impl Default for ArchiveComparator {
    fn default() -> Self {
        Self {
            max_depth: MAX_NESTING_DEPTH,
        }
    }
}

impl ArchiveComparator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Whether two archives hold the same content.
    pub fn equal<L: Read, R: Read>(&self, left: L, right: R) -> ArchiveResult<bool> {
        Ok(self.compare(left, right)?.is_equal())
    }

    /// Compare two archives, collecting every discrepancy.
    pub fn compare<L: Read, R: Read>(&self, left: L, right: R) -> ArchiveResult<ComparisonReport> {
        self.compare_at_depth(left, right, 0)
    }

    fn compare_at_depth<L: Read, R: Read>(
        &self,
        left: L,
        right: R,
        depth: usize,
    ) -> ArchiveResult<ComparisonReport> {
        if depth > self.max_depth {
            return Err(ArchiveError::DepthExceeded(self.max_depth));
        }

        // Each side is drained to EOF on its own; member counts may differ.
        let mut left_members = index_members(left)?;
        let mut right_members = index_members(right)?;

        let mut report = ComparisonReport::default();
        let paths: Vec<String> = left_members
            .keys()
            .chain(right_members.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for path in paths {
            match (left_members.remove(&path), right_members.remove(&path)) {
                (Some(_), None) => {
                    tracing::debug!(member = %path, "member only in left archive");
                    report.push(Discrepancy::OnlyInLeft(path));
                }
                (None, Some(_)) => {
                    tracing::debug!(member = %path, "member only in right archive");
                    report.push(Discrepancy::OnlyInRight(path));
                }
                (Some(Member::Hash(a)), Some(Member::Hash(b))) => {
                    if a != b {
                        tracing::debug!(member = %path, "member content differs");
                        report.push(Discrepancy::ContentDiffers(path));
                    }
                }
                (Some(Member::Nested(a)), Some(Member::Nested(b))) => {
                    if let Some(discrepancy) = self.compare_nested(&path, a, b, depth)? {
                        report.push(discrepancy);
                    }
                }
                // Same path cannot classify differently; kept for exhaustiveness.
                (Some(_), Some(_)) => report.push(Discrepancy::ContentDiffers(path)),
                (None, None) => {}
            }
        }

        Ok(report)
    }

    fn compare_nested(
        &self,
        path: &str,
        left: Vec<u8>,
        right: Vec<u8>,
        depth: usize,
    ) -> ArchiveResult<Option<Discrepancy>> {
        match self.compare_at_depth(left.as_slice(), right.as_slice(), depth + 1) {
            Ok(inner) if inner.is_equal() => Ok(None),
            Ok(inner) => {
                tracing::debug!(member = %path, differences = inner.len(), "nested archive differs");
                Ok(Some(Discrepancy::Nested {
                    path: path.to_string(),
                    report: inner,
                }))
            }
            Err(ArchiveError::Unreadable(e)) => {
                // Named like an archive but not one: fall back to raw bytes.
                tracing::debug!(member = %path, error = %e, "nested member is not an archive, comparing bytes");
                if sha256_hex(&left) == sha256_hex(&right) {
                    Ok(None)
                } else {
                    Ok(Some(Discrepancy::ContentDiffers(path.to_string())))
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Drain an archive, hashing regular files and buffering nested archives.
fn index_members<R: Read>(reader: R) -> ArchiveResult<BTreeMap<String, Member>> {
    let mut archive = open(reader)?;
    let mut members = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = normalize_member_path(&entry.path()?.to_string_lossy());

        let member = if is_nested_archive(&path) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            Member::Nested(buffer)
        } else {
            let mut hasher = Sha256::new();
            io::copy(&mut entry, &mut hasher)?;
            Member::Hash(hex::encode(hasher.finalize()))
        };
        members.insert(path, member);
    }

    Ok(members)
}

fn normalize_member_path(path: &str) -> String {
    path.trim_start_matches("./").to_string()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
