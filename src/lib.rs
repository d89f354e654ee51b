//! Deferred Prover: lazy, cancellable, prioritized proof computations
//!
//! Expensive proof generation is wrapped in [`computation::DeferredComputation`] handles that
//! run at most once, retry with backoff and can be cancelled. A [`scheduler::Scheduler`]
//! drives many of them under a concurrency cap, [`resource::ResourceRegistry`] memoizes
//! load-once artifacts such as verification keys, and [`prefetch::AccessPrefetcher`]
//! speculatively starts proofs for frequently accessed resources.

pub mod cli;
pub mod computation;
pub mod config;
pub mod error;
pub mod logging;
pub mod prefetch;
pub mod resource;
pub mod scheduler;
