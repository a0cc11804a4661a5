//! Config loading facade: merges every source into a validated [`TetherConfig`].

use super::merge::merge_policy;
use super::sources::{environment, explicit_file, user_file};
use super::TetherConfig;
use crate::error::ContextError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads [`TetherConfig`] from defaults, files and environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    ///
    /// Precedence (lowest to highest): defaults, user config file,
    /// `explicit` file (if given), `TETHER__*` environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<TetherConfig, ContextError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = user_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = explicit_file::add_to_builder(builder, path)?;
        }
        builder = environment::add_to_builder(builder);

        let config: TetherConfig = builder.build()?.try_deserialize()?;
        config.ensure_valid()?;
        debug!(
            poll_interval_ms = config.listener.poll_interval_ms,
            max_attempts = config.listener.max_attempts,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from a single file on top of defaults only
    pub fn load_from_file(path: &Path) -> Result<TetherConfig, ContextError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = explicit_file::add_to_builder(builder, path)?;
        let config: TetherConfig = builder.build()?.try_deserialize()?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Path of the user config file, if one can be located
    pub fn user_config_path() -> Option<PathBuf> {
        user_file::user_config_path()
    }
}
