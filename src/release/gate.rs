//! Per-version export decisions.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use keeper_oci::Digest;
use keeper_version::{parse_base, split_build_metadata};

use super::{ChartPackager, ReleaseError, ReleaseResult};
use crate::archive::ArchiveComparator;
use crate::error::BatchError;
use crate::index::RepositoryIndex;
use crate::pool::{JobResult, WorkerPool};
use crate::repo::Filesystem;

/// What happened to one chart version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseDecision {
    /// First package of this version written to the asset store
    Exported,
    /// Content changed and the version is unreleased or allowed to republish
    Replaced,
    /// Same content as the stored asset; existing bytes kept
    Unchanged,
    /// Major version beyond this branch line; not released here
    ForwardPort,
}

impl fmt::Display for ReleaseDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseDecision::Exported => "exported",
            ReleaseDecision::Replaced => "replaced",
            ReleaseDecision::Unchanged => "unchanged",
            ReleaseDecision::ForwardPort => "forward-port",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub chart: String,
    pub version: String,
    pub decision: ReleaseDecision,
}

impl ReleaseOutcome {
    /// Whether the asset store changed
    pub fn wrote(&self) -> bool {
        matches!(self.decision, ReleaseDecision::Exported | ReleaseDecision::Replaced)
    }
}

/// Guards the asset store against silently changing released charts.
pub struct ReleaseGate<'a> {
    fs: &'a dyn Filesystem,
    assets_dir: PathBuf,
    comparator: ArchiveComparator,
    branch_line: Option<u64>,
    republish: BTreeSet<(String, String)>,
}

impl<'a> ReleaseGate<'a> {
    pub fn new(fs: &'a dyn Filesystem, assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            assets_dir: assets_dir.into(),
            comparator: ArchiveComparator::new(),
            branch_line: None,
            republish: BTreeSet::new(),
        }
    }

    pub fn with_branch_line(mut self, major: Option<u64>) -> Self {
        self.branch_line = major;
        self
    }

    /// `name:version` entries allowed to change content after release.
    /// The split is on the first `:`.
    pub fn with_republish<S: AsRef<str>>(mut self, entries: &[S]) -> Self {
        self.republish = entries
            .iter()
            .filter_map(|e| e.as_ref().split_once(':'))
            .map(|(name, version)| (name.to_string(), version.to_string()))
            .collect();
        self
    }

    /// `assets/<name>/<name>-<version>.tgz`
    pub fn asset_path(&self, name: &str, version: &str) -> PathBuf {
        self.assets_dir
            .join(name)
            .join(format!("{}-{}.tgz", name, version))
    }

    fn is_forward_port(&self, version: &str) -> bool {
        let Some(line) = self.branch_line else {
            return false;
        };
        let (base, _) = split_build_metadata(version);
        parse_base(base).is_some_and(|v| v.major > line)
    }

    fn may_republish(&self, name: &str, version: &str) -> bool {
        self.republish.contains(&(name.to_string(), version.to_string()))
    }

    /// Package one chart version and decide what to do with it.
    ///
    /// `published` is the index as last released.
    pub fn release(&self, published: &RepositoryIndex, packager: &dyn ChartPackager) -> ReleaseResult<ReleaseOutcome> {
        let (name, version) = (packager.name(), packager.version());
        let outcome = |decision| ReleaseOutcome {
            chart: name.to_string(),
            version: version.to_string(),
            decision,
        };

        if self.is_forward_port(version) {
            tracing::info!(chart = name, version, "forward-port, not released on this branch");
            return Ok(outcome(ReleaseDecision::ForwardPort));
        }

        let package = packager.package().map_err(|source| ReleaseError::Package {
            chart: format!("{}@{}", name, version),
            source,
        })?;
        let path = self.asset_path(name, version);
        let released = published.get(name, version);

        let decision = if self.fs.exists(&path) {
            let existing = self.read(&path)?;
            let equal = self
                .comparator
                .equal(existing.as_slice(), package.as_slice())
                .map_err(|source| ReleaseError::Archive {
                    path: path.clone(),
                    source,
                })?;
            if equal {
                tracing::debug!(chart = name, version, "content unchanged, keeping stored package");
                return Ok(outcome(ReleaseDecision::Unchanged));
            }
            ReleaseDecision::Replaced
        } else {
            match released {
                Some(entry) if entry.digest == Digest::sha256(&package).encoded() => ReleaseDecision::Exported,
                Some(_) => ReleaseDecision::Replaced,
                None => ReleaseDecision::Exported,
            }
        };

        if decision == ReleaseDecision::Replaced && released.is_some() && !self.may_republish(name, version) {
            return Err(ReleaseError::ModifiedReleasedChart {
                chart: name.to_string(),
                version: version.to_string(),
            });
        }

        self.fs.write(&path, &package).map_err(|source| ReleaseError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(chart = name, version, decision = %decision, path = %path.display(), "package written");
        Ok(outcome(decision))
    }

    /// Release every package on `pool`; failures are joined.
    pub fn release_all(
        &self,
        pool: &WorkerPool,
        published: &RepositoryIndex,
        packages: Vec<Box<dyn ChartPackager>>,
    ) -> Result<Vec<ReleaseOutcome>, BatchError<ReleaseError>> {
        let names: Vec<String> = packages
            .iter()
            .map(|p| format!("{}@{}", p.name(), p.version()))
            .collect();
        let results = pool.run(packages, |packager| self.release(published, packager.as_ref()));

        let mut outcomes = Vec::new();
        let mut failures = BatchError::new();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                JobResult::Done(outcome) => outcomes.push(outcome),
                JobResult::Failed(err) => failures.push(name, err),
                JobResult::Cancelled => failures.push(name, ReleaseError::Cancelled),
            }
        }
        failures.into_result().map(|()| outcomes)
    }

    fn read(&self, path: &Path) -> ReleaseResult<Vec<u8>> {
        self.fs.read(path).map_err(|source| ReleaseError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::index::ChartVersion;
    use crate::release::PackageError;
    use crate::repo::LocalFilesystem;
    use chrono::Utc;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixed {
        name: String,
        version: String,
        bytes: Vec<u8>,
    }

    impl ChartPackager for Fixed {
        fn name(&self) -> &str {
            &self.name
        }
        fn version(&self) -> &str {
            &self.version
        }
        fn package(&self) -> Result<Vec<u8>, PackageError> {
            Ok(self.bytes.clone())
        }
    }

    fn tgz(files: &[(&str, &str)], mtime: u64) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(mtime);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn fixed(version: &str, bytes: Vec<u8>) -> Fixed {
        Fixed {
            name: "fleet".to_string(),
            version: version.to_string(),
            bytes,
        }
    }

    fn published(version: &str, bytes: &[u8]) -> RepositoryIndex {
        let mut index = RepositoryIndex::new(Utc::now());
        index.insert(ChartVersion {
            name: "fleet".to_string(),
            version: version.to_string(),
            digest: Digest::sha256(bytes).encoded().to_string(),
            created: Utc::now(),
            urls: Vec::new(),
            metadata: BTreeMap::new(),
        });
        index
    }

    #[test]
    fn test_new_version_exported() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let gate = ReleaseGate::new(&fs, "assets");
        let bytes = tgz(&[("fleet/Chart.yaml", "name: fleet")], 1);

        let outcome = gate
            .release(&RepositoryIndex::new(Utc::now()), &fixed("104.0.0+up0.9.0", bytes.clone()))
            .unwrap();

        assert_eq!(outcome.decision, ReleaseDecision::Exported);
        assert_eq!(
            fs.read(Path::new("assets/fleet/fleet-104.0.0+up0.9.0.tgz")).unwrap(),
            bytes
        );
    }

    #[test]
    fn test_repackaged_same_content_keeps_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let gate = ReleaseGate::new(&fs, "assets");
        let original = tgz(&[("fleet/Chart.yaml", "name: fleet")], 1);
        let repacked = tgz(&[("fleet/Chart.yaml", "name: fleet")], 999);
        let path = gate.asset_path("fleet", "1.0.0");
        fs.write(&path, &original).unwrap();

        let outcome = gate
            .release(&published("1.0.0", &original), &fixed("1.0.0", repacked))
            .unwrap();

        assert_eq!(outcome.decision, ReleaseDecision::Unchanged);
        assert_eq!(fs.read(&path).unwrap(), original);
    }

    #[test]
    fn test_modified_released_chart_refused() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let gate = ReleaseGate::new(&fs, "assets");
        let original = tgz(&[("fleet/Chart.yaml", "name: fleet")], 1);
        let changed = tgz(&[("fleet/Chart.yaml", "name: fleet\ndescription: new")], 1);
        let path = gate.asset_path("fleet", "1.0.0");
        fs.write(&path, &original).unwrap();

        let err = gate
            .release(&published("1.0.0", &original), &fixed("1.0.0", changed))
            .unwrap_err();

        assert!(err.is_consistency_violation());
        assert_eq!(fs.read(&path).unwrap(), original);
    }

    #[test]
    fn test_republish_allows_change() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let gate = ReleaseGate::new(&fs, "assets").with_republish(&["fleet:1.0.0"]);
        let original = tgz(&[("fleet/Chart.yaml", "name: fleet")], 1);
        let changed = tgz(&[("fleet/Chart.yaml", "name: fleet\ndescription: new")], 1);
        fs.write(&gate.asset_path("fleet", "1.0.0"), &original).unwrap();

        let outcome = gate
            .release(&published("1.0.0", &original), &fixed("1.0.0", changed))
            .unwrap();
        assert_eq!(outcome.decision, ReleaseDecision::Replaced);
    }

    #[test]
    fn test_unreleased_change_replaced() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let gate = ReleaseGate::new(&fs, "assets");
        fs.write(&gate.asset_path("fleet", "1.0.0"), &tgz(&[("a", "1")], 1)).unwrap();

        let outcome = gate
            .release(&RepositoryIndex::new(Utc::now()), &fixed("1.0.0", tgz(&[("a", "2")], 1)))
            .unwrap();
        assert_eq!(outcome.decision, ReleaseDecision::Replaced);
    }

    #[test]
    fn test_forward_port_skipped() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let gate = ReleaseGate::new(&fs, "assets").with_branch_line(Some(104));

        let outcome = gate
            .release(&RepositoryIndex::new(Utc::now()), &fixed("105.0.0+up1.0.0", tgz(&[("a", "1")], 1)))
            .unwrap();

        assert_eq!(outcome.decision, ReleaseDecision::ForwardPort);
        assert!(!fs.exists(&gate.asset_path("fleet", "105.0.0+up1.0.0")));
    }

    #[test]
    fn test_release_all_joins_failures() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let gate = ReleaseGate::new(&fs, "assets");
        let original = tgz(&[("a", "1")], 1);
        fs.write(&gate.asset_path("fleet", "1.0.0"), &original).unwrap();

        let packages: Vec<Box<dyn ChartPackager>> = vec![
            Box::new(fixed("1.0.0", tgz(&[("a", "changed")], 1))),
            Box::new(fixed("1.1.0", tgz(&[("a", "1")], 1))),
        ];
        let err = gate
            .release_all(&WorkerPool::new(2, CancelToken::new()), &published("1.0.0", &original), packages)
            .unwrap_err();

        assert_eq!(err.len(), 1);
        assert_eq!(err.failures()[0].0, "fleet@1.0.0");
        assert!(fs.exists(&gate.asset_path("fleet", "1.1.0")));
    }
}
