//! Plain snapshots of a single computation, suitable for persistence.

use crate::computation::{
    ComputationConfig, ComputationStatus, DeferredComputation, ExecState, SharedWork,
    TriggerEvent, UnitOfWork,
};
use crate::error::{share_cause, ComputeError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Point-in-time description of a computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationSnapshot<T> {
    pub id: String,
    pub status: ComputationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub config: ComputationConfig,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
}

impl<T: DeserializeOwned> ComputationSnapshot<T> {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl<T: Serialize> ComputationSnapshot<T> {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl<T> DeferredComputation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Describe the current state.
    ///
    /// With `TriggerPolicy::OnSerialize` a pending computation starts in the background;
    /// the returned snapshot still reflects the state before that start.
    pub fn snapshot(&self) -> ComputationSnapshot<T> {
        let snapshot = {
            let state = self.inner.state.lock();
            ComputationSnapshot {
                id: self.inner.id.to_string(),
                status: state.status,
                result: state.result.clone(),
                error: state.error.as_ref().map(failure_message),
                config: self.inner.config.clone(),
                created_at: self.inner.created_at,
                resolved_at: state.resolved_at,
                attempts: state.attempts,
            }
        };
        self.notify(TriggerEvent::Serialize);
        snapshot
    }

    /// Rebuild a computation from a snapshot without re-running finished work.
    ///
    /// Terminal snapshots restore their status, result and error. Pending or in-flight
    /// snapshots yield a fresh pending computation that honors the trigger policy.
    pub fn from_snapshot<W>(snapshot: ComputationSnapshot<T>, work: W) -> Self
    where
        W: UnitOfWork<T> + 'static,
    {
        Self::from_snapshot_shared(snapshot, Arc::new(work))
    }

    pub fn from_snapshot_shared(snapshot: ComputationSnapshot<T>, work: SharedWork<T>) -> Self {
        let ComputationSnapshot {
            id,
            status,
            result,
            error,
            config,
            created_at,
            resolved_at,
            attempts,
        } = snapshot;

        let mut state = ExecState::pending();
        match status {
            ComputationStatus::Resolved if result.is_some() => {
                state.status = ComputationStatus::Resolved;
                state.result = result;
                state.resolved_at = resolved_at;
            }
            ComputationStatus::Failed => {
                let message = error.unwrap_or_else(|| "unknown failure".to_string());
                state.status = ComputationStatus::Failed;
                state.error = Some(ComputeError::Failed {
                    attempts,
                    cause: share_cause(anyhow::Error::msg(message)),
                });
            }
            ComputationStatus::Cancelled => {
                state.status = ComputationStatus::Cancelled;
            }
            _ => {
                debug!(computation_id = %id, status = %status, "Restoring computation as pending");
                return Self::from_shared(id, config, work);
            }
        }
        state.attempts = attempts;

        debug!(computation_id = %id, status = %state.status, "Restored computation from snapshot");
        Self::assemble(id, config, work, created_at, state)
    }
}

/// Root cause text, so a restored `Failed` error does not nest its own prefix.
fn failure_message(err: &ComputeError) -> String {
    match err {
        ComputeError::Failed { cause, .. } => cause.to_string(),
        other => other.to_string(),
    }
}

impl<T> DeferredComputation<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    pub fn to_json(&self) -> serde_json::Result<String> {
        self.snapshot().to_json()
    }
}
