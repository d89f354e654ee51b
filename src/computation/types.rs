//! Configuration and status types for deferred computations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Lifecycle status of a deferred computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputationStatus {
    Pending,
    Generating,
    Resolved,
    Cancelled,
    Failed,
}

impl ComputationStatus {
    /// Terminal states only leave via `reset`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ComputationStatus::Resolved | ComputationStatus::Cancelled | ComputationStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComputationStatus::Pending => "pending",
            ComputationStatus::Generating => "generating",
            ComputationStatus::Resolved => "resolved",
            ComputationStatus::Cancelled => "cancelled",
            ComputationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ComputationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When execution of a computation begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerPolicy {
    /// Only an explicit `resolve` starts work
    #[default]
    Manual,
    /// Work starts when a downstream verification touches the computation
    OnVerify,
    /// Work starts when the computation is snapshotted
    OnSerialize,
    /// Work starts as soon as the computation is constructed
    Immediate,
}

/// Downstream operations that may fire a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Verify,
    Serialize,
}

impl TriggerPolicy {
    pub fn fires_on(self, event: TriggerEvent) -> bool {
        matches!(
            (self, event),
            (TriggerPolicy::OnVerify, TriggerEvent::Verify)
                | (TriggerPolicy::OnSerialize, TriggerEvent::Serialize)
        )
    }
}

/// Priority level for scheduled computations
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,      // Speculative work
    #[default]
    Normal = 1,   // Default priority
    High = 2,     // Work a caller is about to need
    Critical = 3, // Work a caller is blocked on
}

/// How a timed-out attempt is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// A timeout ends the computation immediately
    #[default]
    Terminal,
    /// A timeout consumes a retry like any other failure
    Retry,
}

/// Immutable configuration of a deferred computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputationConfig {
    /// When work begins
    pub trigger: TriggerPolicy,
    /// Default scheduling priority
    pub priority: Priority,
    /// Per-attempt timeout (milliseconds, 0 = unbounded)
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay between retries (milliseconds)
    pub retry_delay_ms: u64,
    /// Whether the computation was started speculatively
    pub prefetch: bool,
    /// Classification of timed-out attempts
    pub timeout_policy: TimeoutPolicy,
    /// Free-form caller metadata (system, circuit identifiers)
    pub metadata: BTreeMap<String, String>,
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerPolicy::Manual,
            priority: Priority::Normal,
            timeout_ms: 0,
            max_retries: 0,
            retry_delay_ms: 1000,
            prefetch: false,
            timeout_policy: TimeoutPolicy::Terminal,
            metadata: BTreeMap::new(),
        }
    }
}

impl ComputationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn with_trigger(mut self, trigger: TriggerPolicy) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_policy == TimeoutPolicy::Retry && self.timeout_ms == 0 {
            return Err("timeout_policy 'retry' requires a non-zero timeout_ms".to_string());
        }
        Ok(())
    }
}
