//! The set of artifacts one sync job will push.

use keeper_oci::{ArtifactReference, ImageReference, Manifest};

/// One artifact to copy: where it comes from, where it goes and the source
/// manifest fetched while staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub source: ArtifactReference,
    pub destination: ImageReference,
    pub manifest: Manifest,
}

/// Artifacts of one signed entity, in push order: satellites first, the
/// primary manifest last.
///
/// Built completely before anything is written. Entries can only be removed
/// once staged, and the plan is consumed by the push phase.
#[derive(Debug, Default)]
pub struct SyncPlan {
    entries: Vec<PlanEntry>,
}

impl SyncPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stage(&mut self, entry: PlanEntry) {
        self.entries.push(entry);
        self.entries.sort_by_key(|e| e.source.role);
    }

    /// Drop entries matching `present`; returns what was dropped.
    ///
    /// The first error aborts and leaves the plan untouched.
    pub fn drop_where<F, E>(&mut self, mut present: F) -> Result<Vec<PlanEntry>, E>
    where
        F: FnMut(&PlanEntry) -> Result<bool, E>,
    {
        let mut keep = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            keep.push(!present(entry)?);
        }

        let mut dropped = Vec::new();
        let mut flags = keep.into_iter();
        self.entries.retain(|entry| {
            let kept = flags.next().unwrap_or(true);
            if !kept {
                dropped.push(entry.clone());
            }
            kept
        });
        Ok(dropped)
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.entries
    }
}
