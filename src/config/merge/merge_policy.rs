//! Merge rules: defaults, override order, conflict handling.

use crate::listener::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS};
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("listener.poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?
        .set_default("listener.max_attempts", DEFAULT_MAX_ATTEMPTS)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")
}
