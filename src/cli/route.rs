//! CLI route: run context and command dispatch.

use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_prefetch_report, format_simulation_report, PrefetchRow, SimulationReport,
};
use crate::computation::{AttemptContext, DeferredComputation, Priority};
use crate::config::{ConfigLoader, ProverConfig};
use crate::error::SchedulerError;
use crate::prefetch::{AccessPrefetcher, PrefetchConfig};
use crate::scheduler::{Schedulable, Scheduler};
use anyhow::Context;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const PRIORITY_MIX: [Priority; 4] = [
    Priority::Low,
    Priority::Normal,
    Priority::High,
    Priority::Critical,
];

/// Runtime context for CLI execution: workspace and the loaded configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: ProverConfig,
}

impl RunContext {
    /// Load configuration from an explicit file, or by layering for the workspace.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => ConfigLoader::load(&workspace_root).with_context(|| {
                format!("Failed to load config for workspace {}", workspace_root.display())
            })?,
        };
        Ok(Self::with_config(workspace_root, config))
    }

    pub fn with_config(workspace_root: PathBuf, config: ProverConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    /// Execute a command, returning its printable output.
    pub async fn execute(&self, command: &Commands) -> anyhow::Result<String> {
        match command {
            Commands::Simulate {
                jobs,
                fail_every,
                work_ms,
                priority_mix,
                max_concurrent,
            } => {
                let report = self
                    .simulate(*jobs, *fail_every, *work_ms, *priority_mix, *max_concurrent)
                    .await?;
                Ok(format_simulation_report(&report))
            }
            Commands::Prefetch {
                accesses,
                threshold,
                work_ms,
            } => {
                let rows = self.prefetch(accesses, *threshold, *work_ms).await?;
                Ok(format_prefetch_report(&rows))
            }
            Commands::Config { validate } => self.show_config(*validate),
        }
    }

    async fn simulate(
        &self,
        jobs: usize,
        fail_every: usize,
        work_ms: u64,
        priority_mix: bool,
        max_concurrent: Option<usize>,
    ) -> anyhow::Result<SimulationReport> {
        let mut scheduler_config = self.config.scheduler.clone();
        if let Some(max_concurrent) = max_concurrent {
            scheduler_config.max_concurrent = max_concurrent;
        }
        let scheduler = Scheduler::new(scheduler_config);
        let completion_order = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();

        info!(
            jobs,
            fail_every,
            work_ms,
            workspace_root = %self.workspace_root.display(),
            "Starting simulation"
        );

        let mut batch: Vec<(Arc<dyn Schedulable>, Option<Priority>)> = Vec::with_capacity(jobs);
        for index in 0..jobs {
            let priority = if priority_mix {
                PRIORITY_MIX[index % PRIORITY_MIX.len()]
            } else {
                self.config.computation.priority
            };
            let job_id = format!("job-{}", index + 1);
            let fails = fail_every > 0 && (index + 1) % fail_every == 0;
            let order = Arc::clone(&completion_order);
            let name = job_id.clone();

            let computation = DeferredComputation::<u64>::with_id(
                job_id,
                self.config.computation.clone().with_priority(priority),
                move |ctx: AttemptContext| {
                    let order = Arc::clone(&order);
                    let name = name.clone();
                    async move {
                        tokio::select! {
                            _ = ctx.signal().cancelled() => anyhow::bail!("{} aborted", name),
                            _ = tokio::time::sleep(Duration::from_millis(work_ms)) => {}
                        }
                        if fails {
                            anyhow::bail!("synthetic failure in {}", name);
                        }
                        order.lock().push(name);
                        Ok(index as u64)
                    }
                },
            );

            batch.push((Arc::new(computation) as Arc<dyn Schedulable>, None));
        }

        let mut rejected = 0;
        for (index, outcome) in scheduler.enqueue_batch(batch).into_iter().enumerate() {
            let job_id = format!("job-{}", index + 1);
            match outcome {
                Ok(item_id) => debug!(item_id = %item_id, job_id = %job_id, "Job enqueued"),
                Err(SchedulerError::QueueFull { capacity }) => {
                    warn!(job_id = %job_id, capacity, "Job rejected, queue full");
                    rejected += 1;
                }
            }
        }

        scheduler.process().await;

        let completion_order = completion_order.lock().clone();
        Ok(SimulationReport {
            jobs,
            rejected,
            elapsed_ms: started.elapsed().as_millis() as u64,
            stats: scheduler.stats(),
            completion_order,
        })
    }

    async fn prefetch(
        &self,
        accesses: &str,
        threshold: Option<f64>,
        work_ms: u64,
    ) -> anyhow::Result<Vec<PrefetchRow>> {
        let mut prefetch_config: PrefetchConfig = self.config.prefetch.clone();
        if let Some(threshold) = threshold {
            prefetch_config.likelihood_threshold = threshold;
        }
        prefetch_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid prefetch settings: {}", e))?;

        let accesses: Vec<&str> = accesses
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect();
        let prefetcher = AccessPrefetcher::<String>::new(prefetch_config);
        let distinct: BTreeSet<&str> = accesses.iter().copied().collect();
        for resource_id in &distinct {
            let name = resource_id.to_string();
            prefetcher.register(*resource_id, move |_ctx: AttemptContext| {
                let name = name.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(work_ms)).await;
                    Ok(format!("proof-{}", name))
                }
            });
        }

        for resource_id in &accesses {
            prefetcher.record_access(resource_id);
        }

        let likelihoods = prefetcher.likelihoods();
        let mut rows = Vec::with_capacity(likelihoods.len());
        for (resource_id, likelihood) in likelihoods {
            let speculative = prefetcher.get_prefetched(&resource_id);
            let status = match &speculative {
                Some(computation) => {
                    if let Err(e) = computation.resolve().await {
                        warn!(resource_id = %resource_id, error = %e, "Speculative proof failed");
                    }
                    Some(computation.status().to_string())
                }
                None => None,
            };
            rows.push(PrefetchRow {
                resource_id,
                likelihood,
                prefetched: speculative.is_some(),
                status,
            });
        }
        Ok(rows)
    }

    fn show_config(&self, validate: bool) -> anyhow::Result<String> {
        if !validate {
            return self
                .config
                .to_toml()
                .context("Failed to render configuration");
        }
        match self.config.validate() {
            Ok(()) => Ok("Configuration is valid.\n".to_string()),
            Err(errors) => {
                let messages: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
                anyhow::bail!("Configuration is invalid:\n{}", messages.join("\n"))
            }
        }
    }
}
