pub mod checkpoint;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod losses;
pub mod models;
pub mod summary;
pub mod tensors;
pub mod training;

use log::{debug, info};

pub use config::TrainConfig;
pub use engine::{EmotionEngine, Engine};
pub use error::{Result, TrainErr};
pub use training::{Orchestrator, RunConfig, TrainMetrics};

use crate::data::{DataProvider, Split};

/// Trains the model described by `cfg` until `max_steps`.
///
/// Resumes from `train_dir` if it already holds a checkpoint.
pub async fn train(cfg: &TrainConfig) -> Result<TrainMetrics> {
    cfg.validate()?;
    info!(
        "training the {} model on {} (device {})",
        cfg.model,
        cfg.dataset_dir.display(),
        cfg.train_device
    );
    debug!("{cfg:?}");

    let config_path = cfg.save()?;
    debug!("wrote {}", config_path.display());

    let provider = DataProvider::open(&cfg.dataset_dir, Split::Train)?;
    let dims = provider.dims();
    info!("{} training clips with dims {dims:?}", provider.len());

    let engine = EmotionEngine::build(cfg, dims, provider.len())?;
    let batches = provider.spawn(cfg.batch_size, cfg.num_preprocess_threads, cfg.seed);

    let run_cfg = RunConfig {
        max_steps: cfg.max_steps,
        summary_interval: cfg.summary_interval(),
        checkpoint_interval: cfg.checkpoint_interval(),
        max_to_keep: checkpoint::Saver::MAX_TO_KEEP,
        train_dir: cfg.train_dir.clone(),
    };

    let orchestrator = Orchestrator::new(run_cfg, engine)?;
    let (_, metrics) = orchestrator
        .run(batches, cfg.pretrained_checkpoint())
        .await?;

    Ok(metrics)
}
