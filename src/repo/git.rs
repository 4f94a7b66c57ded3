//! Git working tree operations.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Errors from git operations
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// The two git operations publishing needs.
pub trait GitRepository: Send + Sync {
    /// No staged, unstaged or untracked changes.
    fn is_clean(&self) -> Result<bool, GitError>;

    /// Stage `paths` and commit them with `message`.
    fn add_and_commit(&self, paths: &[PathBuf], message: &str) -> Result<(), GitError>;
}

/// Git through the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.workdir)
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(GitError::Failed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl GitRepository for GitCli {
    fn is_clean(&self) -> Result<bool, GitError> {
        let status = self.run(&["status", "--porcelain"])?;
        Ok(status.trim().is_empty())
    }

    fn add_and_commit(&self, paths: &[PathBuf], message: &str) -> Result<(), GitError> {
        let mut add: Vec<String> = vec!["add".to_string(), "--".to_string()];
        add.extend(paths.iter().map(|p| p.to_string_lossy().to_string()));
        let add_args: Vec<&str> = add.iter().map(String::as_str).collect();
        self.run(&add_args)?;
        self.run(&["commit", "-m", message])?;
        Ok(())
    }
}
