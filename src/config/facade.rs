//! Loader entry points over the layered sources.

use super::merge::merge_policy;
use super::sources::{env_vars, global_file, workspace_file};
use super::ProverConfig;
use crate::error::ConfigError;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the merged configuration for a workspace.
    ///
    /// Layers, lowest first: defaults, global file, `config/config.toml`,
    /// `config/{DEFERRED_PROVER_ENV}.toml`, environment variables.
    pub fn load(workspace_root: &Path) -> Result<ProverConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = env_vars::add_to_builder(builder);

        let config: ProverConfig = builder.build()?.try_deserialize()?;
        debug!(workspace_root = %workspace_root.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load a single file over the defaults, without global, workspace or env layers.
    pub fn load_from_file(path: &Path) -> Result<ProverConfig, ConfigError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load and validate, joining every validation error into one message.
    pub fn load_validated(workspace_root: &Path) -> Result<ProverConfig, ConfigError> {
        let config = Self::load(workspace_root)?;
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ConfigError::Invalid(messages.join("\n"))
        })?;
        Ok(config)
    }

    /// Path of the user-level config file, if HOME is set
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
