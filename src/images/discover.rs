//! Finding the images charts use and where each one currently lives.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use keeper_oci::RegistryError;

use super::extract::ImageExtractor;
use super::value::ValueNode;
use super::{DenyList, DiscoveryError, DiscoveryResult, SyncManifest};
use crate::error::BatchError;
use crate::pool::{JobResult, WorkerPool};
use crate::repo::{ChartLoader, Filesystem};
use crate::sync::{RegistryClient, RegistryHosts, RetryPolicy};

/// Images referenced by the values files of every chart package under
/// `assets_dir`, restricted to repositories with one of `prefixes`.
pub fn collect_images(
    fs: &dyn Filesystem,
    loader: &dyn ChartLoader,
    assets_dir: &Path,
    prefixes: &[String],
) -> DiscoveryResult<SyncManifest> {
    let packages = fs.walk(assets_dir).map_err(|source| DiscoveryError::Io {
        path: assets_dir.to_path_buf(),
        source,
    })?;

    let mut images = SyncManifest::new();
    for path in packages.iter().filter(|p| p.extension().is_some_and(|e| e == "tgz")) {
        let data = fs.read(path).map_err(|source| DiscoveryError::Io {
            path: path.clone(),
            source,
        })?;
        let chart = loader.load(&data).map_err(|source| DiscoveryError::Chart {
            path: path.clone(),
            source,
        })?;

        let mut extractor = ImageExtractor::new(prefixes);
        for (file, contents) in chart.values_files() {
            let value: serde_yaml::Value = serde_yaml::from_slice(contents).map_err(|source| DiscoveryError::Yaml {
                path: PathBuf::from(format!("{}!{}", path.display(), file)),
                source,
            })?;
            if let Some(node) = ValueNode::from_yaml(&value) {
                node.walk(&mut extractor);
            }
        }
        for image in extractor.into_images() {
            images.insert(&image.repository, &image.tag);
        }
    }
    tracing::info!(images = images.len(), "collected images from chart values");
    Ok(images)
}

/// Where each wanted image is available
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPartition {
    /// Only on Docker Hub
    pub docker_to_prime: SyncManifest,
    /// On staging, not yet on prime
    pub staging_to_prime: SyncManifest,
    /// Already on prime
    pub synced: SyncManifest,
    /// Nowhere to copy from
    pub missing: SyncManifest,
    /// Excluded by the deny list
    pub denied: SyncManifest,
}

impl SyncPartition {
    /// Rewrite both sync manifest files from this partition.
    pub fn write_manifests(&self, fs: &dyn Filesystem, docker_path: &Path, staging_path: &Path) -> DiscoveryResult<()> {
        self.docker_to_prime.save(fs, docker_path)?;
        self.staging_to_prime.save(fs, staging_path)?;
        tracing::info!(
            docker = self.docker_to_prime.len(),
            staging = self.staging_to_prime.len(),
            synced = self.synced.len(),
            missing = self.missing.len(),
            "sync manifests written"
        );
        Ok(())
    }
}

/// Compares wanted images with the tag listings of the three registries.
pub struct ImageDiscovery<'a> {
    client: &'a dyn RegistryClient,
    hosts: RegistryHosts,
    deny: DenyList,
    retry: RetryPolicy,
}

impl<'a> ImageDiscovery<'a> {
    pub fn new(client: &'a dyn RegistryClient, hosts: RegistryHosts, deny: DenyList, retry: RetryPolicy) -> Self {
        Self {
            client,
            hosts,
            deny,
            retry,
        }
    }

    /// Partition `wanted`, one listing job per repository on `pool`.
    ///
    /// Prime wins over staging, staging over Docker Hub. Docker Hub is only
    /// listed for tags neither of the others has.
    pub fn partition(&self, pool: &WorkerPool, wanted: &SyncManifest) -> DiscoveryResult<SyncPartition> {
        let mut partition = SyncPartition::default();
        let mut jobs = Vec::new();
        for (repository, tags) in &wanted.0 {
            let mut allowed = BTreeSet::new();
            for tag in tags {
                if self.deny.is_denied(repository, tag) {
                    tracing::info!(repository = %repository, tag = %tag, "denied, not synced");
                    partition.denied.insert(repository, tag);
                } else {
                    allowed.insert(tag.clone());
                }
            }
            if !allowed.is_empty() {
                jobs.push((repository.clone(), allowed));
            }
        }

        let results = pool.run(jobs.clone(), |(repository, tags)| self.locate(&repository, &tags));

        let mut failures = BatchError::new();
        for ((repository, _), result) in jobs.into_iter().zip(results) {
            match result {
                JobResult::Done(found) => {
                    for (target, tag) in found {
                        let manifest = match target {
                            Location::Prime => &mut partition.synced,
                            Location::Staging => &mut partition.staging_to_prime,
                            Location::DockerHub => &mut partition.docker_to_prime,
                            Location::Missing => &mut partition.missing,
                        };
                        manifest.insert(&repository, &tag);
                    }
                }
                JobResult::Failed(err) => failures.push(repository, err),
                JobResult::Cancelled => return Err(DiscoveryError::Cancelled),
            }
        }
        failures.into_result().map_err(DiscoveryError::Registry)?;

        for (repository, tag) in partition.missing.iter() {
            tracing::warn!(repository, tag, "image not found in any registry");
        }
        Ok(partition)
    }

    fn locate(&self, repository: &str, tags: &BTreeSet<String>) -> Result<Vec<(Location, String)>, RegistryError> {
        let prime = self.tags(&self.hosts.prime, repository)?;
        let staging = self.tags(&self.hosts.staging, repository)?;

        let mut found = Vec::new();
        let mut remaining = Vec::new();
        for tag in tags {
            if prime.contains(tag) {
                found.push((Location::Prime, tag.clone()));
            } else if staging.contains(tag) {
                found.push((Location::Staging, tag.clone()));
            } else {
                remaining.push(tag.clone());
            }
        }
        if !remaining.is_empty() {
            let docker = self.tags(&self.hosts.docker, repository)?;
            for tag in remaining {
                let location = if docker.contains(&tag) {
                    Location::DockerHub
                } else {
                    Location::Missing
                };
                found.push((location, tag));
            }
        }
        Ok(found)
    }

    fn tags(&self, registry: &str, repository: &str) -> Result<BTreeSet<String>, RegistryError> {
        let tags = self
            .retry
            .run("list tags", || self.client.list_tags(registry, repository))?;
        Ok(tags.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Prime,
    Staging,
    DockerHub,
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::mock::{FailureConfig, MemoryRegistry, RegistryOp};
    use keeper_oci::ImageReference;

    fn hosts() -> RegistryHosts {
        RegistryHosts {
            docker: "docker.io".to_string(),
            staging: "stg.example.com".to_string(),
            prime: "prime.example.com".to_string(),
        }
    }

    fn wanted(pairs: &[(&str, &str)]) -> SyncManifest {
        let mut manifest = SyncManifest::new();
        for (repo, tag) in pairs {
            manifest.insert(repo, tag);
        }
        manifest
    }

    #[test]
    fn test_prime_then_staging_then_docker() {
        let registry = MemoryRegistry::new();
        registry.add_image(&ImageReference::tagged("prime.example.com", "rancher/fleet", "v1"), &[b"a"]);
        registry.add_image(&ImageReference::tagged("stg.example.com", "rancher/fleet", "v1"), &[b"a"]);
        registry.add_image(&ImageReference::tagged("stg.example.com", "rancher/fleet", "v2"), &[b"b"]);
        registry.add_image(&ImageReference::tagged("docker.io", "rancher/fleet", "v2"), &[b"b"]);
        registry.add_image(&ImageReference::tagged("docker.io", "rancher/fleet", "v3"), &[b"c"]);

        let discovery = ImageDiscovery::new(&registry, hosts(), DenyList::default(), RetryPolicy::immediate(0));
        let pool = WorkerPool::new(2, CancelToken::new());
        let partition = discovery
            .partition(
                &pool,
                &wanted(&[
                    ("rancher/fleet", "v1"),
                    ("rancher/fleet", "v2"),
                    ("rancher/fleet", "v3"),
                    ("rancher/fleet", "v4"),
                ]),
            )
            .unwrap();

        assert_eq!(partition.synced, wanted(&[("rancher/fleet", "v1")]));
        assert_eq!(partition.staging_to_prime, wanted(&[("rancher/fleet", "v2")]));
        assert_eq!(partition.docker_to_prime, wanted(&[("rancher/fleet", "v3")]));
        assert_eq!(partition.missing, wanted(&[("rancher/fleet", "v4")]));
    }

    #[test]
    fn test_denied_pairs_never_listed() {
        let registry = MemoryRegistry::new();
        let deny = DenyList::new(&["rancher/*:latest"]).unwrap();
        let discovery = ImageDiscovery::new(&registry, hosts(), deny, RetryPolicy::immediate(0));

        let partition = discovery
            .partition(&WorkerPool::new(1, CancelToken::new()), &wanted(&[("rancher/shell", "latest")]))
            .unwrap();

        assert_eq!(partition.denied.len(), 1);
        assert!(registry.calls().is_empty());
    }

    #[test]
    fn test_listing_failures_are_joined() {
        let registry = MemoryRegistry::new();
        registry.inject(RegistryOp::ListTags, FailureConfig::http(500).matching("rancher/a"));
        registry.inject(RegistryOp::ListTags, FailureConfig::http(500).matching("rancher/b"));
        let discovery = ImageDiscovery::new(&registry, hosts(), DenyList::default(), RetryPolicy::immediate(0));

        let err = discovery
            .partition(
                &WorkerPool::new(2, CancelToken::new()),
                &wanted(&[("rancher/a", "v1"), ("rancher/b", "v1"), ("rancher/c", "v1")]),
            )
            .unwrap_err();

        let DiscoveryError::Registry(batch) = err else {
            panic!("expected registry failures");
        };
        assert_eq!(batch.len(), 2);
    }
}
