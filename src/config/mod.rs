//! Configuration
//!
//! Settings are merged from three layers, last wins:
//! 1. Built-in defaults
//! 2. Repo config (`.chart-keeper.toml`)
//! 3. CLI overrides

mod defaults;
mod effective;
mod merge;

pub use defaults::{
    ImageSettings, PathSettings, RegistryEndpoint, RegistrySettings, ReleaseSettings, Settings,
    VersioningSettings,
};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, REPO_CONFIG_FILE};
pub use merge::{deep_merge, merge_layers};
