//! Images that are never synced.

use globset::{Glob, GlobMatcher};

use super::DiscoveryError;

/// `<repository glob>:<tag glob>` patterns.
///
/// The split is on the last `:`, so `rancher/*:v1.*` matches every
/// `rancher/` repository tagged `v1.<anything>`.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    rules: Vec<(GlobMatcher, GlobMatcher)>,
}

impl DenyList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, DiscoveryError> {
        let rules = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                let invalid = |reason: String| DiscoveryError::DenyPattern {
                    pattern: pattern.to_string(),
                    reason,
                };
                let (repository, tag) = pattern
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("expected <repository glob>:<tag glob>".to_string()))?;
                let repository = Glob::new(repository).map_err(|e| invalid(e.to_string()))?;
                let tag = Glob::new(tag).map_err(|e| invalid(e.to_string()))?;
                Ok((repository.compile_matcher(), tag.compile_matcher()))
            })
            .collect::<Result<_, DiscoveryError>>()?;
        Ok(Self { rules })
    }

    pub fn is_denied(&self, repository: &str, tag: &str) -> bool {
        self.rules
            .iter()
            .any(|(repo, t)| repo.is_match(repository) && t.is_match(tag))
    }
}
