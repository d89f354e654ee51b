//! Error types for deferred proof scheduling.

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Shared, cloneable cause attached to work and loader failures.
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Convert a unit-of-work failure into a cause that can fan out to every waiter.
pub(crate) fn share_cause(err: anyhow::Error) -> SharedCause {
    let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
    Arc::from(boxed)
}

/// Outcome errors of a deferred computation
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    #[error("Computation has not resolved")]
    NotResolved,

    #[error("Computation was cancelled")]
    Cancelled,

    #[error("Computation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Computation failed after {attempts} attempt(s): {cause}")]
    Failed {
        attempts: u32,
        #[source]
        cause: SharedCause,
    },
}

impl ComputeError {
    /// Whether the error came from an explicit cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ComputeError::Cancelled)
    }
}

/// Scheduler admission errors
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("Scheduler queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

/// Lazy resource errors
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("Resource not found: {system}/{id}")]
    NotFound { system: String, id: String },

    #[error("Resource {key} failed to load: {cause}")]
    LoadFailed {
        key: String,
        #[source]
        cause: SharedCause,
    },
}

/// Configuration and logging setup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Configuration validation failed:\n{0}")]
    Invalid(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}
