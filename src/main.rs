use clap::Parser;
use log::{info, warn};
use tokio::signal;

use emotion::TrainConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = TrainConfig::parse();

    tokio::select! {
        metrics = emotion::train(&cfg) => {
            let metrics = metrics?;
            info!(
                "done: {} steps in {:.1?} of compute, {:.1?} waiting for data, last loss {:?}",
                metrics.steps,
                metrics.compute_time,
                metrics.data_time,
                metrics.last_loss
            );
        }
        _ = signal::ctrl_c() => {
            warn!("interrupted, exiting without a final checkpoint");
            anyhow::bail!("interrupted before reaching max_steps");
        }
    }

    Ok(())
}
