use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::Serialize;

use crate::{TrainErr, error::Result, models::ModelKind};

pub const CONFIG_FILE: &str = "config.json";

/// Immutable training options, parsed once from the command line.
#[derive(Parser, Debug, Clone, PartialEq, Serialize)]
#[command(name = "emotion_train", about = "Trains a continuous emotion recognition model")]
pub struct TrainConfig {
    /// Initial learning rate.
    #[arg(long, default_value_t = 0.001)]
    pub initial_learning_rate: f32,
    /// Epochs after which the learning rate decays.
    #[arg(long, default_value_t = 5.0)]
    pub num_epochs_per_decay: f32,
    /// Learning rate decay factor.
    #[arg(long, default_value_t = 0.97)]
    pub learning_rate_decay_factor: f32,
    /// The batch size to use.
    #[arg(long, default_value_t = 10)]
    pub batch_size: usize,
    /// Number of data loading workers.
    #[arg(long, default_value_t = 4)]
    pub num_preprocess_threads: usize,
    /// Directory where checkpoints and event logs are written.
    #[arg(long, default_value = "ckpt/train")]
    pub train_dir: PathBuf,
    /// Weights to seed the backbones with, empty to start from scratch.
    #[arg(long, default_value = "ckpt/pretrained_models/backbone.safetensors")]
    pub pretrained_model_checkpoint_path: String,
    /// Number of steps to train for.
    #[arg(long, default_value_t = 100_000)]
    pub max_steps: u64,
    /// Device to train on. Only logged.
    #[arg(long, default_value = "/gpu:0")]
    pub train_device: String,
    /// Which model to train.
    #[arg(long, value_enum, default_value_t = ModelKind::Video)]
    pub model: ModelKind,
    /// The dataset directory, with one subdirectory per split.
    #[arg(long, default_value = "data/recola")]
    pub dataset_dir: PathBuf,
    /// Seconds between summary flushes.
    #[arg(long, default_value_t = 60)]
    pub save_summaries_secs: u64,
    /// Seconds between checkpoints.
    #[arg(long, default_value_t = 600)]
    pub save_interval_secs: u64,
    /// Width of the hidden layers.
    #[arg(long, default_value_t = 256)]
    pub hidden_units: usize,
    /// L2 penalty on the weights.
    #[arg(long, default_value_t = 0.0001)]
    pub weight_decay: f32,
    /// Optional seed for initialization and shuffling.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::parse_from(["emotion_train"])
    }
}

impl TrainConfig {
    /// Checks what must hold before any work starts.
    ///
    /// # Errors
    /// `InvalidConfig` if `dataset_dir` isn't a readable directory or a size is zero.
    pub fn validate(&self) -> Result<()> {
        fs::read_dir(&self.dataset_dir).map_err(|e| {
            TrainErr::InvalidConfig(format!(
                "dataset_dir {} is not readable: {e}",
                self.dataset_dir.display()
            ))
        })?;

        if self.batch_size == 0 {
            return Err(TrainErr::InvalidConfig("batch_size must be positive".into()));
        }
        if self.num_preprocess_threads == 0 {
            return Err(TrainErr::InvalidConfig(
                "num_preprocess_threads must be positive".into(),
            ));
        }

        Ok(())
    }

    /// The pretrained weights to seed the model with, `None` for a cold start.
    pub fn pretrained_checkpoint(&self) -> Option<&Path> {
        let path = self.pretrained_model_checkpoint_path.trim();
        (!path.is_empty()).then(|| Path::new(path))
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.save_summaries_secs)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    /// Writes the resolved options to `train_dir/config.json`.
    pub fn save(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.train_dir)?;
        let path = self.train_dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TrainConfig::default();

        assert_eq!(cfg.initial_learning_rate, 0.001);
        assert_eq!(cfg.num_epochs_per_decay, 5.0);
        assert_eq!(cfg.learning_rate_decay_factor, 0.97);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.num_preprocess_threads, 4);
        assert_eq!(cfg.train_dir, PathBuf::from("ckpt/train"));
        assert_eq!(
            cfg.pretrained_checkpoint(),
            Some(Path::new("ckpt/pretrained_models/backbone.safetensors"))
        );
        assert_eq!(cfg.max_steps, 100_000);
        assert_eq!(cfg.train_device, "/gpu:0");
        assert_eq!(cfg.model, ModelKind::Video);
        assert_eq!(cfg.dataset_dir, PathBuf::from("data/recola"));
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn parsing_is_idempotent() {
        let args = [
            "emotion_train",
            "--batch-size",
            "2",
            "--model",
            "both",
            "--initial-learning-rate",
            "0.01",
            "--pretrained-model-checkpoint-path",
            "",
        ];

        let a = TrainConfig::parse_from(args);
        let b = TrainConfig::parse_from(args);

        assert_eq!(a, b);
        assert_eq!(a.batch_size, 2);
        assert_eq!(a.model, ModelKind::Both);
        assert_eq!(a.pretrained_checkpoint(), None);
    }

    #[test]
    fn rejects_unknown_models() {
        let err = TrainConfig::try_parse_from(["emotion_train", "--model", "text"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn unreadable_dataset_dir_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            dataset_dir: dir.path().join("missing"),
            ..TrainConfig::default()
        };

        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            dataset_dir: dir.path().to_path_buf(),
            batch_size: 0,
            ..TrainConfig::default()
        };

        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));
        assert!(TrainConfig { batch_size: 1, ..cfg }.validate().is_ok());
    }

    #[test]
    fn saves_a_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            train_dir: dir.path().join("train"),
            seed: Some(3),
            ..TrainConfig::default()
        };

        let path = cfg.save().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();

        assert_eq!(json["model"], "video");
        assert_eq!(json["batch_size"], 10);
        assert_eq!(json["seed"], 3);
    }
}
