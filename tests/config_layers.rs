//! Integration tests: repository configuration driving behavior

use std::fs;

use chart_keeper::config::{ConfigOrigin, EffectiveConfig, REPO_CONFIG_FILE};
use chart_keeper::images::DenyList;
use chart_keeper::index::DigestPolicy;
use serde_json::json;
use tempfile::TempDir;

const REPO_CONFIG: &str = r#"
[versioning]
prerelease_order = ["-beta.", "-alpha."]
digest_policy = "reject"

[images]
deny_list = ["rancher/*:latest", "rancher/mirrored-*:*-rc*"]

[release]
branch_line = 104
republish = ["fleet:104.0.0+up0.10.0"]
"#;

#[test]
fn test_repo_file_then_cli() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(REPO_CONFIG_FILE), REPO_CONFIG).unwrap();

    let effective =
        EffectiveConfig::for_repository(dir.path(), Some(json!({"release": {"workers": 2}}))).unwrap();

    let origins: Vec<_> = effective.sources.iter().map(|s| s.origin).collect();
    assert_eq!(origins, vec![ConfigOrigin::Builtin, ConfigOrigin::Repo, ConfigOrigin::Cli]);
    assert!(effective.sources[1].digest.is_some());

    let settings = &effective.settings;
    assert_eq!(settings.release.workers, 2);
    assert_eq!(settings.release.branch_line, Some(104));
    assert_eq!(settings.versioning.digest_policy, DigestPolicy::Reject);
    // Untouched sections keep their defaults
    assert_eq!(settings.registries.timeout_seconds, 30);
}

#[test]
fn test_configured_prerelease_order_changes_sorting() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(REPO_CONFIG_FILE), REPO_CONFIG).unwrap();
    let settings = EffectiveConfig::for_repository(dir.path(), None).unwrap().settings;

    let sorted = settings.ordering().sorted(&["1.0.0+up1-beta.1", "1.0.0+up1", "1.0.0+up1-alpha.1"]);

    assert_eq!(sorted, vec!["1.0.0+up1", "1.0.0+up1-alpha.1", "1.0.0+up1-beta.1"]);
}

#[test]
fn test_configured_deny_list_applies() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(REPO_CONFIG_FILE), REPO_CONFIG).unwrap();
    let settings = EffectiveConfig::for_repository(dir.path(), None).unwrap().settings;

    let deny = DenyList::new(&settings.images.deny_list).unwrap();

    assert!(deny.is_denied("rancher/shell", "latest"));
    assert!(deny.is_denied("rancher/mirrored-coredns", "v1.11-rc1"));
    assert!(!deny.is_denied("rancher/mirrored-coredns", "v1.11.1"));
}
