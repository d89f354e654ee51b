//! Configuration System
//!
//! Layered settings for the scheduler, computation defaults, prefetching and logging.
//! Sources merge lowest first: built-in defaults, the global user file, workspace files,
//! then `DEFERRED_PROVER__SECTION__KEY` environment variables.

use crate::computation::ComputationConfig;
use crate::logging::LoggingConfig;
use crate::prefetch::PrefetchConfig;
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProverConfig {
    /// Queue and concurrency settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Defaults applied to computations built from this config
    #[serde(default)]
    pub computation: ComputationConfig,

    /// Speculative prefetch settings
    #[serde(default)]
    pub prefetch: PrefetchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Scheduler: {0}")]
    Scheduler(String),

    #[error("Computation: {0}")]
    Computation(String),

    #[error("Prefetch: {0}")]
    Prefetch(String),

    #[error("Logging: {0}")]
    Logging(String),
}

impl ProverConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.scheduler.validate() {
            errors.push(ValidationError::Scheduler(e));
        }
        if let Err(e) = self.computation.validate() {
            errors.push(ValidationError::Computation(e));
        }
        if let Err(e) = self.prefetch.validate() {
            errors.push(ValidationError::Prefetch(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render as TOML, the format the config files use
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
