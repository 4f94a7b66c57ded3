//! Bounded exponential backoff for rate-limited registry calls.

use std::time::Duration;

use keeper_oci::RegistryError;
use rand::Rng;

use crate::config::RegistrySettings;

/// Retries only [`RegistryError::RateLimited`]; every other error is
/// returned immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that retries without sleeping, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry `attempt` (1-based): doubles from the initial
    /// delay up to the cap, with up to 20% jitter added.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        if base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 5);
        (base + Duration::from_millis(jitter)).min(self.max_delay)
    }

    /// Run `op`, sleeping between rate-limited attempts.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Result<T, RegistryError>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_rate_limited() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = err
                        .retry_after()
                        .map(|d| d.min(self.max_delay))
                        .unwrap_or_else(|| self.backoff(attempt));
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    std::thread::sleep(delay);
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RegistrySettings::default())
    }
}

impl From<&RegistrySettings> for RetryPolicy {
    fn from(settings: &RegistrySettings) -> Self {
        Self {
            max_retries: settings.rate_limit_retries,
            initial_delay: Duration::from_millis(settings.retry_initial_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }
}
