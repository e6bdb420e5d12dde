//! Orchestrator - scan fan-out, status aggregation and result fan-in

mod config;
mod locks;
mod orchestrator;
mod progress;

pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use progress::ProgressTally;
