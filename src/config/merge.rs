//! Merge rules applied while layering sources.

pub mod merge_policy;
