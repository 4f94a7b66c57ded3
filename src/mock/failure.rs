//! Failure injection for the in-memory registry.

use std::collections::HashMap;
use std::time::Duration;

use keeper_oci::RegistryError;

/// Registry operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    GetManifest,
    ManifestExists,
    ListTags,
    BlobExists,
    GetBlob,
    PutBlob,
    PutManifest,
}

/// Failure for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    pub error: RegistryError,
    /// Only calls whose target contains this string fail
    pub matching: Option<String>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
    /// Matching calls that succeed before the first failure
    pub pass_first: u32,
}

impl FailureConfig {
    pub fn error(error: RegistryError) -> Self {
        Self {
            error,
            matching: None,
            fail_count: None,
            pass_first: 0,
        }
    }

    /// HTTP 429 from `registry`
    pub fn rate_limited(registry: &str) -> Self {
        Self::error(RegistryError::RateLimited {
            registry: registry.to_string(),
            retry_after: Some(Duration::ZERO),
        })
    }

    /// HTTP `status` for the failing call
    pub fn http(status: u16) -> Self {
        Self::error(RegistryError::Http {
            status,
            url: "memory://".to_string(),
        })
    }

    pub fn matching(mut self, target: impl Into<String>) -> Self {
        self.matching = Some(target.into());
        self
    }

    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    pub fn after_successes(mut self, count: u32) -> Self {
        self.pass_first = count;
        self
    }
}

#[derive(Debug)]
struct Armed {
    config: FailureConfig,
    seen: u32,
    hits: u32,
}

/// Failure configs and hit counts per operation
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<RegistryOp, Vec<Armed>>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, op: RegistryOp, config: FailureConfig) {
        self.configs.entry(op).or_default().push(Armed {
            config,
            seen: 0,
            hits: 0,
        });
    }

    pub fn clear(&mut self) {
        self.configs.clear();
    }

    /// The error `op` on `target` should return, if any.
    pub fn check(&mut self, op: RegistryOp, target: &str) -> Option<RegistryError> {
        let configs = self.configs.get_mut(&op)?;
        for armed in configs.iter_mut() {
            let config = &armed.config;
            if config.matching.as_deref().is_some_and(|m| !target.contains(m)) {
                continue;
            }
            armed.seen += 1;
            if armed.seen <= config.pass_first {
                continue;
            }
            if config.fail_count.is_some_and(|limit| armed.hits >= limit) {
                continue;
            }
            armed.hits += 1;
            return Some(config.error.clone());
        }
        None
    }
}
