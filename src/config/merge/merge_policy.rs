//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Only scalar keys get defaults here; every section also falls back to its serde
/// defaults, so a partial file never drops unspecified keys.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("scheduler.max_concurrent", 2_i64)?
        .set_default("scheduler.max_queue_size", 1000_i64)?
        .set_default("scheduler.auto_process", true)?
        .set_default("prefetch.analysis_window_ms", 60_000_i64)?
        .set_default("prefetch.likelihood_threshold", 0.7_f64)?
        .set_default("prefetch.max_prefetch", 3_i64)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")
}
