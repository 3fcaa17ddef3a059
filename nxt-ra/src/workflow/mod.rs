//! Research workflow
//!
//! - `orchestrator`: one run across the portfolio, bounded concurrency,
//!   run slot and cancellation
//! - `pipeline`: collection → validation → analysis → update for one project
//! - `statistics`: run summary and the weekly markdown report

pub mod orchestrator;
pub mod pipeline;
pub mod statistics;

pub use orchestrator::{RunOrchestrator, RunTicket};
pub use pipeline::{ProjectPipeline, ProjectReport};
pub use statistics::{RunSummary, StageStats, VelocityChange};
