//! Errors shared across batch operations, and process exit codes.

use std::fmt;

/// Invalid input or configuration
pub const EXIT_CODE_VALIDATION: i32 = 2;
/// A published artifact would change
pub const EXIT_CODE_CONSISTENCY: i32 = 3;
/// Filesystem, git or network failure
pub const EXIT_CODE_IO: i32 = 4;

/// Failures collected from independent jobs of one batch.
///
/// Every job runs to completion; the batch reports all failures together.
#[derive(Debug)]
pub struct BatchError<E> {
    failures: Vec<(String, E)>,
}

impl<E> BatchError<E> {
    pub fn new() -> Self {
        Self { failures: Vec::new() }
    }

    pub fn push(&mut self, job: impl Into<String>, error: E) {
        self.failures.push((job.into(), error));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[(String, E)] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<(String, E)> {
        self.failures
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(mut self) -> Result<(), Self> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            self.failures.sort_by(|a, b| a.0.cmp(&b.0));
            Err(self)
        }
    }
}

impl<E> Default for BatchError<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> FromIterator<(String, E)> for BatchError<E> {
    fn from_iter<I: IntoIterator<Item = (String, E)>>(iter: I) -> Self {
        Self {
            failures: iter.into_iter().collect(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for BatchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job(s) failed", self.failures.len())?;
        for (job, error) in &self.failures {
            write!(f, "\n  {}: {}", job, error)?;
        }
        Ok(())
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BatchError<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch_is_ok() {
        let batch: BatchError<String> = BatchError::new();
        assert!(batch.into_result().is_ok());
    }

    #[test]
    fn test_display_joins_failures_sorted() {
        let mut batch = BatchError::new();
        batch.push("zeta", "boom".to_string());
        batch.push("alpha", "bang".to_string());
        let err = batch.into_result().unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(err.to_string(), "2 job(s) failed\n  alpha: bang\n  zeta: boom");
    }
}
