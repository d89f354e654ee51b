//! CLI presentation: text formatters per command.

use crate::scheduler::SchedulerStats;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;

/// Outcome of a `simulate` run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub jobs: usize,
    pub rejected: usize,
    pub elapsed_ms: u64,
    pub stats: SchedulerStats,
    /// Job ids in completion order
    pub completion_order: Vec<String>,
}

/// One resource row of a `prefetch` run
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchRow {
    pub resource_id: String,
    pub likelihood: f64,
    pub prefetched: bool,
    pub status: Option<String>,
}

pub fn format_simulation_report(report: &SimulationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Simulated {} job(s) in {} ms\n\n",
        report.jobs, report.elapsed_ms
    ));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Count"]);
    let stats = &report.stats;
    table.add_row(vec!["Completed".to_string(), stats.completed.to_string()]);
    table.add_row(vec!["Failed".to_string(), stats.failed.to_string()]);
    table.add_row(vec!["Cancelled".to_string(), stats.cancelled.to_string()]);
    table.add_row(vec!["Rejected".to_string(), report.rejected.to_string()]);
    table.add_row(vec!["Queued".to_string(), stats.queued.to_string()]);
    table.add_row(vec!["Processing".to_string(), stats.processing.to_string()]);
    out.push_str(&format!("{}\n", table));

    if !report.completion_order.is_empty() {
        out.push_str(&format!(
            "\nCompletion order: {}\n",
            report.completion_order.join(", ")
        ));
    }
    out
}

pub fn format_prefetch_report(rows: &[PrefetchRow]) -> String {
    if rows.is_empty() {
        return "No accesses recorded.\n".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Resource", "Likelihood", "Prefetched", "Status"]);
    for row in rows {
        table.add_row(vec![
            row.resource_id.clone(),
            format!("{:.2}", row.likelihood),
            if row.prefetched { "yes" } else { "no" }.to_string(),
            row.status.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    format!("{}\n", table)
}
