//! Reconciliation of a generated index against the published one.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use keeper_version::{VersionOrdering, VersionStandards};

use super::{ChartVersion, DigestPolicy, IndexError, IndexLock, IndexResult, RepositoryIndex};
use crate::error::BatchError;
use crate::repo::Filesystem;

/// Changes between the published and the merged index, as `(chart, version)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexUpdate {
    pub new: Vec<(String, String)>,
    pub modified: Vec<(String, String)>,
    pub removed: Vec<(String, String)>,
    /// Whether the index file was rewritten
    pub written: bool,
}

impl IndexUpdate {
    pub fn is_up_to_date(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

impl fmt::Display for IndexUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_up_to_date() {
            return write!(f, "index is up to date");
        }
        for (marker, list) in [("+", &self.new), ("~", &self.modified), ("-", &self.removed)] {
            for (chart, version) in list {
                writeln!(f, "{} {} {}", marker, chart, version)?;
            }
        }
        Ok(())
    }
}

/// Result of [`IndexReconciler::reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub index: RepositoryIndex,
    pub up_to_date: bool,
    pub changes: IndexUpdate,
}

/// Merges freshly generated indexes into the published one.
///
/// Owns the lock that serializes read-merge-write of the index file within
/// this process; [`IndexLock`] covers other processes.
#[derive(Debug)]
pub struct IndexReconciler {
    ordering: VersionOrdering,
    standards: VersionStandards,
    policy: DigestPolicy,
    lock: Mutex<()>,
}

impl IndexReconciler {
    pub fn new(ordering: VersionOrdering, standards: VersionStandards, policy: DigestPolicy) -> Self {
        Self {
            ordering,
            standards,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn ordering(&self) -> &VersionOrdering {
        &self.ordering
    }

    /// Reject generated versions outside the version standards. Every
    /// offending version is reported.
    pub fn check_standards(&self, generated: &RepositoryIndex) -> IndexResult<()> {
        generated
            .iter()
            .filter_map(|chart| {
                self.standards
                    .check(&chart.name, &chart.version)
                    .err()
                    .map(|e| (format!("{}@{}", chart.name, chart.version), e))
            })
            .collect::<BatchError<_>>()
            .into_result()
            .map_err(IndexError::NonStandardVersions)
    }

    /// Merge `generated` onto `stored`.
    ///
    /// Versions only in `generated` are new; versions in both keep the
    /// stored `created` timestamp when their digests match and are modified
    /// otherwise; versions only in `stored` are removed. The result is sorted
    /// and reconciling it again against itself is a no-op.
    pub fn reconcile(&self, stored: &RepositoryIndex, generated: &RepositoryIndex) -> IndexResult<Reconciliation> {
        self.check_standards(generated)?;

        let mut changes = IndexUpdate::default();
        let mut merged = RepositoryIndex::new(generated.generated);
        merged.api_version = generated.api_version.clone();
        merged.extra = stored.extra.clone();

        for chart in generated.iter() {
            let mut entry = chart.clone();
            match stored.get(&chart.name, &chart.version) {
                None => {
                    tracing::info!(chart = %chart.name, version = %chart.version, "new chart version");
                    changes.new.push(identity(chart));
                }
                Some(published) if published.digest == chart.digest => {
                    entry.created = published.created;
                }
                Some(published) => {
                    if self.policy == DigestPolicy::Reject {
                        return Err(IndexError::DigestDrift {
                            chart: chart.name.clone(),
                            version: chart.version.clone(),
                            stored: published.digest.clone(),
                            generated: chart.digest.clone(),
                        });
                    }
                    tracing::warn!(
                        chart = %chart.name,
                        version = %chart.version,
                        stored = %published.digest,
                        generated = %chart.digest,
                        "chart version modified"
                    );
                    changes.modified.push(identity(chart));
                }
            }
            merged.insert(entry);
        }

        for chart in stored.iter() {
            if !generated.contains(&chart.name, &chart.version) {
                tracing::info!(chart = %chart.name, version = %chart.version, "chart version removed");
                changes.removed.push(identity(chart));
            }
        }

        let up_to_date = changes.is_up_to_date();
        if up_to_date {
            merged.generated = stored.generated;
        }
        merged.sort(&self.ordering);

        Ok(Reconciliation {
            index: merged,
            up_to_date,
            changes,
        })
    }

    /// Reconcile the index file at `index_path` with `generated` and write
    /// the merged index when it changed.
    ///
    /// A missing index file is treated as empty. Concurrent callers block
    /// until the running update has written its result.
    pub fn update_file(
        &self,
        fs: &dyn Filesystem,
        index_path: &Path,
        generated: &RepositoryIndex,
    ) -> IndexResult<IndexUpdate> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _file_lock = IndexLock::acquire(&fs.root().join(index_path)).map_err(|source| IndexError::Io {
            path: index_path.to_path_buf(),
            source,
        })?;

        let existing = RepositoryIndex::read(fs, index_path)?;
        let file_exists = existing.is_some();
        let stored = existing.unwrap_or_else(|| {
            tracing::info!(path = %index_path.display(), "no published index, starting empty");
            RepositoryIndex::new(generated.generated)
        });

        let Reconciliation {
            index,
            up_to_date,
            mut changes,
        } = self.reconcile(&stored, generated)?;

        if up_to_date && file_exists {
            tracing::info!(path = %index_path.display(), "index is up to date");
            return Ok(changes);
        }

        let yaml = index.to_yaml().map_err(IndexError::Serialize)?;
        fs.write(index_path, yaml.as_bytes()).map_err(|source| IndexError::Io {
            path: index_path.to_path_buf(),
            source,
        })?;
        changes.written = true;
        tracing::info!(
            path = %index_path.display(),
            new = changes.new.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "index written"
        );
        Ok(changes)
    }
}

impl Default for IndexReconciler {
    fn default() -> Self {
        Self::new(VersionOrdering::default(), VersionStandards::default(), DigestPolicy::default())
    }
}

fn identity(chart: &ChartVersion) -> (String, String) {
    (chart.name.clone(), chart.version.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::LocalFilesystem;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn chart(name: &str, version: &str, digest: &str, created: i64) -> ChartVersion {
        ChartVersion {
            name: name.to_string(),
            version: version.to_string(),
            digest: digest.to_string(),
            created: at(created),
            urls: vec![format!("assets/{name}/{name}-{version}.tgz")],
            metadata: BTreeMap::new(),
        }
    }

    fn index(generated: i64, charts: Vec<ChartVersion>) -> RepositoryIndex {
        let mut index = RepositoryIndex::new(at(generated));
        for chart in charts {
            index.insert(chart);
        }
        index
    }

    fn versions(index: &RepositoryIndex, name: &str) -> Vec<String> {
        index.entries[name].iter().map(|v| v.version.clone()).collect()
    }

    #[test]
    fn test_new_version_added() {
        let stored = index(100, vec![chart("fleet", "104.0.0+up0.9.0", "a", 10)]);
        let generated = index(
            200,
            vec![
                chart("fleet", "104.0.0+up0.9.0", "a", 150),
                chart("fleet", "104.1.0+up0.9.1", "b", 150),
            ],
        );

        let result = IndexReconciler::default().reconcile(&stored, &generated).unwrap();

        assert!(!result.up_to_date);
        assert_eq!(result.changes.new, vec![("fleet".to_string(), "104.1.0+up0.9.1".to_string())]);
        assert_eq!(versions(&result.index, "fleet"), vec!["104.1.0+up0.9.1", "104.0.0+up0.9.0"]);
        assert_eq!(result.index.generated, at(200));
    }

    #[test]
    fn test_equal_digest_keeps_stored_created() {
        let stored = index(100, vec![chart("fleet", "104.0.0+up0.9.0", "a", 10)]);
        let generated = index(200, vec![chart("fleet", "104.0.0+up0.9.0", "a", 150)]);

        let result = IndexReconciler::default().reconcile(&stored, &generated).unwrap();

        assert!(result.up_to_date);
        assert_eq!(result.index.generated, at(100));
        assert_eq!(result.index.get("fleet", "104.0.0+up0.9.0").unwrap().created, at(10));
    }

    #[test]
    fn test_modified_digest_reported() {
        let stored = index(100, vec![chart("fleet", "104.0.0+up0.9.0", "a", 10)]);
        let generated = index(200, vec![chart("fleet", "104.0.0+up0.9.0", "b", 150)]);

        let result = IndexReconciler::default().reconcile(&stored, &generated).unwrap();

        assert!(!result.up_to_date);
        assert_eq!(result.changes.modified.len(), 1);
        let entry = result.index.get("fleet", "104.0.0+up0.9.0").unwrap();
        assert_eq!(entry.digest, "b");
        assert_eq!(entry.created, at(150));
    }

    #[test]
    fn test_modified_digest_rejected_under_strict_policy() {
        let reconciler = IndexReconciler::new(
            VersionOrdering::default(),
            VersionStandards::default(),
            DigestPolicy::Reject,
        );
        let stored = index(100, vec![chart("fleet", "104.0.0+up0.9.0", "a", 10)]);
        let generated = index(200, vec![chart("fleet", "104.0.0+up0.9.0", "b", 150)]);

        let err = reconciler.reconcile(&stored, &generated).unwrap_err();
        assert!(err.is_consistency_violation());
    }

    #[test]
    fn test_removed_version() {
        let stored = index(
            100,
            vec![chart("fleet", "104.0.0+up0.9.0", "a", 10), chart("gone", "1.0.0", "c", 10)],
        );
        let generated = index(200, vec![chart("fleet", "104.0.0+up0.9.0", "a", 150)]);

        let result = IndexReconciler::default().reconcile(&stored, &generated).unwrap();

        assert!(!result.up_to_date);
        assert_eq!(result.changes.removed, vec![("gone".to_string(), "1.0.0".to_string())]);
        assert!(!result.index.entries.contains_key("gone"));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let stored = index(100, vec![chart("fleet", "104.0.0+up0.9.0", "a", 10)]);
        let generated = index(
            200,
            vec![
                chart("fleet", "104.0.0+up0.9.0", "a", 150),
                chart("fleet", "104.0.0+up0.9.0-rc.1", "r", 150),
                chart("istio", "1.0.0", "i", 150),
            ],
        );
        let reconciler = IndexReconciler::default();

        let first = reconciler.reconcile(&stored, &generated).unwrap();
        let second = reconciler.reconcile(&first.index, &generated).unwrap();

        assert!(second.up_to_date);
        assert_eq!(first.index, second.index);
    }

    #[test]
    fn test_nonstandard_version_rejected_with_name() {
        let generated = index(
            200,
            vec![
                chart("fleet", "104.0.0+up0.9.0-preview.1", "a", 150),
                chart("istio", "not-a-version", "b", 150),
            ],
        );

        let err = IndexReconciler::default()
            .reconcile(&RepositoryIndex::new(at(0)), &generated)
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("fleet@104.0.0+up0.9.0-preview.1"), "{message}");
        assert!(message.contains("istio@not-a-version"), "{message}");
    }

    #[test]
    fn test_update_file_writes_once() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let reconciler = IndexReconciler::default();
        let generated = index(200, vec![chart("fleet", "104.0.0+up0.9.0", "a", 150)]);

        let first = reconciler.update_file(&fs, Path::new("index.yaml"), &generated).unwrap();
        assert!(first.written);
        assert_eq!(first.new.len(), 1);
        let written = std::fs::read(dir.path().join("index.yaml")).unwrap();

        let regenerated = index(300, vec![chart("fleet", "104.0.0+up0.9.0", "a", 250)]);
        let second = reconciler.update_file(&fs, Path::new("index.yaml"), &regenerated).unwrap();

        assert!(!second.written);
        assert!(second.is_up_to_date());
        assert_eq!(std::fs::read(dir.path().join("index.yaml")).unwrap(), written);
    }

    #[test]
    fn test_concurrent_updates_serialize() {
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(LocalFilesystem::new(dir.path()));
        let reconciler = Arc::new(IndexReconciler::default());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let fs = Arc::clone(&fs);
                let reconciler = Arc::clone(&reconciler);
                thread::spawn(move || {
                    let generated = index(200 + i, vec![chart("fleet", &format!("1.0.{i}"), "a", 150)]);
                    reconciler
                        .update_file(fs.as_ref(), Path::new("index.yaml"), &generated)
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let data = std::fs::read(dir.path().join("index.yaml")).unwrap();
        let index = RepositoryIndex::from_yaml(&data).unwrap();
        assert_eq!(index.len(), 1);
    }
}
