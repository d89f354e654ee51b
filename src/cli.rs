//! CLI domain: parse, route and presentation only.
//! Orchestration lives in the library components; handlers wire them together.

mod parse;
mod presentation;
mod route;

pub use parse::{Cli, Commands};
pub use presentation::{format_prefetch_report, format_simulation_report, PrefetchRow, SimulationReport};
pub use route::RunContext;
