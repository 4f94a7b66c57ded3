//! Integration tests: index generation and reconciliation
//!
//! The index file is rewritten only when its content changes, published
//! versions keep their `created` timestamp and entries list newest first.

mod fixtures;

use std::path::Path;
use std::sync::Arc;
use std::thread;

use chart_keeper::index::{DigestPolicy, IndexError, IndexGenerator, IndexReconciler, RepositoryIndex};
use chart_keeper::repo::{Filesystem, LocalFilesystem, TgzChartLoader};
use chrono::{Duration, TimeZone, Utc};
use keeper_version::{VersionOrdering, VersionStandards};
use tempfile::TempDir;

use fixtures::chart_package;

const BASE: &str = "108.0.0+up0.14.0";

fn asset(fs: &LocalFilesystem, name: &str, version: &str, values: &str) {
    let path = format!("assets/{}/{}-{}.tgz", name, name, version);
    fs.write(Path::new(&path), &chart_package(name, version, values)).unwrap();
}

fn generate(fs: &LocalFilesystem, at: chrono::DateTime<Utc>) -> RepositoryIndex {
    IndexGenerator::new(fs, &TgzChartLoader)
        .generate(Path::new("assets"), at)
        .unwrap()
}

#[test]
fn test_prerelease_channels_list_after_stable() {
    let ordering = VersionOrdering::default();
    let input: Vec<String> = ["-alpha.2", "", "-rc.1", "-beta.1", "-alpha.5", "-alpha.1"]
        .iter()
        .map(|suffix| format!("{}{}", BASE, suffix))
        .collect();

    let sorted = ordering.sorted(&input);

    let expected: Vec<String> = ["", "-rc.1", "-beta.1", "-alpha.5", "-alpha.2", "-alpha.1"]
        .iter()
        .map(|suffix| format!("{}{}", BASE, suffix))
        .collect();
    assert_eq!(sorted, expected);
}

#[test]
fn test_index_entries_are_sorted_on_write() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFilesystem::new(dir.path());
    for suffix in ["-alpha.2", "", "-rc.1", "-alpha.10"] {
        asset(&fs, "rancher-monitoring", &format!("{}{}", BASE, suffix), "{}\n");
    }

    let reconciler = IndexReconciler::default();
    reconciler
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, Utc::now()))
        .unwrap();

    let written = RepositoryIndex::read(&fs, Path::new("index.yaml")).unwrap().unwrap();
    let versions: Vec<&str> = written.entries["rancher-monitoring"]
        .iter()
        .map(|v| v.version.as_str())
        .collect();
    assert_eq!(
        versions,
        vec![
            "108.0.0+up0.14.0",
            "108.0.0+up0.14.0-rc.1",
            "108.0.0+up0.14.0-alpha.10",
            "108.0.0+up0.14.0-alpha.2",
        ]
    );
}

#[test]
fn test_regenerating_unchanged_assets_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFilesystem::new(dir.path());
    asset(&fs, "fleet", "104.0.0+up0.10.0", "{}\n");
    asset(&fs, "fleet-crd", "104.0.0+up0.10.0", "{}\n");
    let reconciler = IndexReconciler::default();
    let first_run = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let first = reconciler
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, first_run))
        .unwrap();
    assert!(first.written);
    assert_eq!(first.new.len(), 2);
    let before = fs.read(Path::new("index.yaml")).unwrap();

    let second = reconciler
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, first_run + Duration::days(30)))
        .unwrap();

    assert!(second.is_up_to_date());
    assert!(!second.written);
    assert_eq!(fs.read(Path::new("index.yaml")).unwrap(), before);
}

#[test]
fn test_new_version_keeps_existing_timestamps() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFilesystem::new(dir.path());
    asset(&fs, "fleet", "104.0.0+up0.10.0", "{}\n");
    let reconciler = IndexReconciler::default();
    let first_run = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    reconciler
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, first_run))
        .unwrap();

    asset(&fs, "fleet", "104.1.0+up0.10.1", "{}\n");
    let later = first_run + Duration::days(7);
    let update = reconciler
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, later))
        .unwrap();

    assert_eq!(update.new, vec![("fleet".to_string(), "104.1.0+up0.10.1".to_string())]);
    let index = RepositoryIndex::read(&fs, Path::new("index.yaml")).unwrap().unwrap();
    assert_eq!(index.get("fleet", "104.0.0+up0.10.0").unwrap().created, first_run);
    assert_eq!(index.get("fleet", "104.1.0+up0.10.1").unwrap().created, later);
    assert_eq!(
        index.get("fleet", "104.1.0+up0.10.1").unwrap().urls,
        vec!["assets/fleet/fleet-104.1.0+up0.10.1.tgz".to_string()]
    );
}

#[test]
fn test_changed_package_under_strict_policy_leaves_index_alone() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFilesystem::new(dir.path());
    asset(&fs, "fleet", "104.0.0+up0.10.0", "replicas: 1\n");
    let reconciler = IndexReconciler::new(
        VersionOrdering::default(),
        VersionStandards::default(),
        DigestPolicy::Reject,
    );
    reconciler
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, Utc::now()))
        .unwrap();
    let before = fs.read(Path::new("index.yaml")).unwrap();

    asset(&fs, "fleet", "104.0.0+up0.10.0", "replicas: 2\n");
    let err = reconciler
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, Utc::now()))
        .unwrap_err();

    assert!(matches!(err, IndexError::DigestDrift { .. }));
    assert!(err.is_consistency_violation());
    assert_eq!(fs.read(Path::new("index.yaml")).unwrap(), before);
}

#[test]
fn test_nonstandard_versions_abort_before_writing() {
    let dir = TempDir::new().unwrap();
    let fs = LocalFilesystem::new(dir.path());
    asset(&fs, "fleet", "104.0.0+up0.10.0-preview.1", "{}\n");
    asset(&fs, "fleet", "104.0.0+up0.10.0-nightly.3", "{}\n");

    let err = IndexReconciler::default()
        .update_file(&fs, Path::new("index.yaml"), &generate(&fs, Utc::now()))
        .unwrap_err();

    let IndexError::NonStandardVersions(batch) = &err else {
        panic!("expected a standards failure, got {:?}", err);
    };
    assert_eq!(batch.len(), 2);
    assert!(err.is_validation());
    assert!(!fs.exists(Path::new("index.yaml")));
}

#[test]
fn test_concurrent_updates_converge() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(LocalFilesystem::new(dir.path()));
    asset(&fs, "fleet", "104.0.0+up0.10.0", "{}\n");
    let generated = Arc::new(generate(&fs, Utc::now()));
    let reconciler = Arc::new(IndexReconciler::default());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fs = Arc::clone(&fs);
            let generated = Arc::clone(&generated);
            let reconciler = Arc::clone(&reconciler);
            thread::spawn(move || {
                reconciler
                    .update_file(fs.as_ref(), Path::new("index.yaml"), &generated)
                    .unwrap()
            })
        })
        .collect();
    let updates: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(updates.iter().filter(|u| u.written).count(), 1);
    let index = RepositoryIndex::read(fs.as_ref(), Path::new("index.yaml")).unwrap().unwrap();
    assert_eq!(index.len(), 1);
}
