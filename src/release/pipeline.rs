//! Gate, index update and commit as one release run.

use std::path::PathBuf;

use chrono::Utc;

use super::{ChartPackager, ReleaseError, ReleaseGate, ReleaseOutcome, ReleaseResult};
use crate::index::{IndexGenerator, IndexReconciler, IndexUpdate, RepositoryIndex};
use crate::pool::WorkerPool;
use crate::repo::{ChartLoader, Filesystem, GitRepository};

/// Summary of one release run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcomes: Vec<ReleaseOutcome>,
    pub index: IndexUpdate,
    pub committed: bool,
}

/// Releases packages, refreshes the index and commits the result.
pub struct ReleasePipeline<'a> {
    fs: &'a dyn Filesystem,
    loader: &'a dyn ChartLoader,
    git: &'a dyn GitRepository,
    gate: ReleaseGate<'a>,
    reconciler: &'a IndexReconciler,
    assets_dir: PathBuf,
    index_path: PathBuf,
}

impl<'a> ReleasePipeline<'a> {
    pub fn new(
        fs: &'a dyn Filesystem,
        loader: &'a dyn ChartLoader,
        git: &'a dyn GitRepository,
        gate: ReleaseGate<'a>,
        reconciler: &'a IndexReconciler,
        assets_dir: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fs,
            loader,
            git,
            gate,
            reconciler,
            assets_dir: assets_dir.into(),
            index_path: index_path.into(),
        }
    }

    /// Any failing package aborts the run before the index is touched.
    pub fn run(&self, pool: &WorkerPool, packages: Vec<Box<dyn ChartPackager>>) -> ReleaseResult<PipelineReport> {
        let published = RepositoryIndex::read(self.fs, &self.index_path)?
            .unwrap_or_else(|| RepositoryIndex::new(Utc::now()));

        let outcomes = self
            .gate
            .release_all(pool, &published, packages)
            .map_err(ReleaseError::Batch)?;

        let generated = IndexGenerator::new(self.fs, self.loader).generate(&self.assets_dir, Utc::now())?;
        let index = self.reconciler.update_file(self.fs, &self.index_path, &generated)?;

        let committed = if self.git.is_clean()? {
            tracing::info!("nothing to commit");
            false
        } else {
            let message = commit_message(&outcomes, &index);
            self.git
                .add_and_commit(&[self.assets_dir.clone(), self.index_path.clone()], &message)?;
            tracing::info!(summary = %message.lines().next().unwrap_or_default(), "committed release");
            true
        };

        Ok(PipelineReport {
            outcomes,
            index,
            committed,
        })
    }
}

fn commit_message(outcomes: &[ReleaseOutcome], index: &IndexUpdate) -> String {
    let written: Vec<_> = outcomes.iter().filter(|o| o.wrote()).collect();
    let mut message = format!("Release {} chart version(s)\n", written.len());
    if !written.is_empty() {
        message.push('\n');
    }
    for outcome in written {
        message.push_str(&format!("- {} {} ({})\n", outcome.chart, outcome.version, outcome.decision));
    }
    for (chart, version) in &index.removed {
        message.push_str(&format!("- {} {} (removed from index)\n", chart, version));
    }
    message
}
