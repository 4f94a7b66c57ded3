//! Logging initialization
//!
//! All library code logs through `tracing` macros with structured fields.
//! The binary installs a subscriber once at startup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "chart_keeper=info";

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable lines on stderr
    Human,
    /// One JSON object per event (CI logs)
    Json,
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        // try_init: a test harness may already own the global subscriber
        let _ = match profile {
            Profile::Human => builder.try_init(),
            Profile::Json => builder.json().try_init(),
        };
    });
}
