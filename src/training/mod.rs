mod metrics;
mod orchestrator;

pub use metrics::TrainMetrics;
pub use orchestrator::{Orchestrator, Phase, RunConfig};
