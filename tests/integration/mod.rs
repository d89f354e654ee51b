//! Integration tests for deferred computations, scheduling, resources and prefetching

mod computation_lifecycle;
mod config_integration;
mod prefetch;
mod snapshot_roundtrip;

pub use test_utils::with_isolated_env;
