//! Access-pattern prefetching
//!
//! Records resource accesses over a sliding window and, once a resource's share of recent
//! accesses reaches the likelihood threshold, starts a low-priority speculative
//! computation for it so the next real request is served from cache.

use crate::computation::{
    ComputationConfig, ComputationStatus, DeferredComputation, Priority, SharedWork,
    TriggerPolicy, UnitOfWork,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Prefetch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Sliding window of accesses considered (ms)
    pub analysis_window_ms: u64,
    /// Minimum share of windowed accesses (0.0 - 1.0) that triggers a prefetch
    pub likelihood_threshold: f64,
    /// Maximum speculative computations tracked at once
    pub max_prefetch: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            analysis_window_ms: 60_000,
            likelihood_threshold: 0.7,
            max_prefetch: 3,
        }
    }
}

impl PrefetchConfig {
    pub fn analysis_window(&self) -> Duration {
        Duration::from_millis(self.analysis_window_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.analysis_window_ms == 0 {
            return Err("analysis_window_ms must be greater than 0".to_string());
        }
        if !(self.likelihood_threshold > 0.0 && self.likelihood_threshold <= 1.0) {
            return Err(format!(
                "likelihood_threshold must be in (0, 1], got {}",
                self.likelihood_threshold
            ));
        }
        Ok(())
    }
}

struct PrefetchState<T> {
    log: VecDeque<(String, Instant)>,
    tracked: HashMap<String, DeferredComputation<T>>,
    work: HashMap<String, SharedWork<T>>,
}

/// Speculative prefetcher. Clones share the same access log.
pub struct AccessPrefetcher<T> {
    config: PrefetchConfig,
    state: Arc<Mutex<PrefetchState<T>>>,
}

impl<T> Clone for AccessPrefetcher<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> AccessPrefetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(PrefetchState {
                log: VecDeque::new(),
                tracked: HashMap::new(),
                work: HashMap::new(),
            })),
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Register the unit of work that produces `resource_id`.
    pub fn register<W>(&self, resource_id: impl Into<String>, work: W)
    where
        W: UnitOfWork<T> + 'static,
    {
        self.state
            .lock()
            .work
            .insert(resource_id.into(), Arc::new(work));
    }

    /// Record one access and start speculation for resources that crossed the threshold.
    ///
    /// Returns the ids for which a speculative computation was started by this call.
    pub fn record_access(&self, resource_id: &str) -> Vec<String> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.log.push_back((resource_id.to_string(), now));
        self.prune(&mut state, now);
        Self::release_dead(&mut state);

        let mut started = Vec::new();
        for (candidate, likelihood) in self.candidates(&state) {
            if state.tracked.contains_key(&candidate) {
                continue;
            }
            if state.tracked.len() >= self.config.max_prefetch {
                debug!(
                    resource_id = %candidate,
                    max_prefetch = self.config.max_prefetch,
                    "Prefetch slots exhausted"
                );
                break;
            }
            let Some(work) = state.work.get(&candidate).cloned() else {
                debug!(resource_id = %candidate, "No work registered, skipping prefetch");
                continue;
            };

            let config = ComputationConfig {
                trigger: TriggerPolicy::Immediate,
                priority: Priority::Low,
                prefetch: true,
                ..ComputationConfig::default()
            }
            .with_metadata("resource_id", candidate.clone());
            let computation =
                DeferredComputation::from_shared(format!("prefetch-{candidate}"), config, work);

            info!(
                resource_id = %candidate,
                likelihood,
                computation_id = %computation.id(),
                "Started speculative prefetch"
            );
            state.tracked.insert(candidate.clone(), computation);
            started.push(candidate);
        }
        started
    }

    /// Speculative computation tracked for `resource_id`, if any
    pub fn get_prefetched(&self, resource_id: &str) -> Option<DeferredComputation<T>> {
        self.state.lock().tracked.get(resource_id).cloned()
    }

    /// Cancel all speculation and forget the access log. Registered work is kept.
    pub fn clear(&self) {
        let tracked: Vec<DeferredComputation<T>> = {
            let mut state = self.state.lock();
            state.log.clear();
            state.tracked.drain().map(|(_, computation)| computation).collect()
        };
        for computation in &tracked {
            computation.cancel();
        }
        debug!(cancelled = tracked.len(), "Prefetcher cleared");
    }

    /// Current windowed access likelihoods, highest first
    pub fn likelihoods(&self) -> Vec<(String, f64)> {
        let mut state = self.state.lock();
        self.prune(&mut state, Instant::now());
        self.all_likelihoods(&state)
    }

    pub fn tracked_count(&self) -> usize {
        self.state.lock().tracked.len()
    }

    fn prune(&self, state: &mut PrefetchState<T>, now: Instant) {
        let window = self.config.analysis_window();
        while let Some((_, at)) = state.log.front() {
            if now.duration_since(*at) > window {
                state.log.pop_front();
            } else {
                break;
            }
        }
    }

    /// Free slots held by speculation that failed or was cancelled.
    fn release_dead(state: &mut PrefetchState<T>) {
        state.tracked.retain(|resource_id, computation| {
            let alive = !matches!(
                computation.status(),
                ComputationStatus::Failed | ComputationStatus::Cancelled
            );
            if !alive {
                debug!(resource_id = %resource_id, "Released dead prefetch");
            }
            alive
        });
    }

    fn all_likelihoods(&self, state: &PrefetchState<T>) -> Vec<(String, f64)> {
        let total = state.log.len();
        if total == 0 {
            return Vec::new();
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (resource_id, _) in &state.log {
            *counts.entry(resource_id.as_str()).or_default() += 1;
        }
        let mut likelihoods: Vec<(String, f64)> = counts
            .into_iter()
            .map(|(resource_id, count)| (resource_id.to_string(), count as f64 / total as f64))
            .collect();
        likelihoods.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        likelihoods
    }

    fn candidates(&self, state: &PrefetchState<T>) -> Vec<(String, f64)> {
        self.all_likelihoods(state)
            .into_iter()
            .filter(|(_, likelihood)| *likelihood >= self.config.likelihood_threshold)
            .collect()
    }
}
