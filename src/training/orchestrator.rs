use std::{
    fmt, io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use tokio::task;

use super::TrainMetrics;
use crate::{
    checkpoint::{self, Saver},
    data::{Batch, BatchStream},
    engine::{Engine, StepReport},
    error::Result,
    summary::SummaryWriter,
};

const LOG_EVERY: u64 = 10;

/// The stages of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Build,
    Restore,
    Run,
    Checkpoint,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Build => "build",
            Phase::Restore => "restore",
            Phase::Run => "run",
            Phase::Checkpoint => "checkpoint",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How long to train and how often to report.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub max_steps: u64,
    pub summary_interval: Duration,
    pub checkpoint_interval: Duration,
    pub max_to_keep: usize,
    pub train_dir: PathBuf,
}

/// Drives an `Engine` through restoration, the step loop and the periodic checkpoints.
///
/// Concurrency note:
/// - Steps are CPU-bound and run on Tokio's blocking pool via `spawn_blocking`.
/// - The engine is moved into the blocking task and handed back with the step's result.
pub struct Orchestrator<E> {
    cfg: RunConfig,
    engine: Option<E>,
    saver: Saver,
    summaries: SummaryWriter,
    metrics: TrainMetrics,
    phase: Phase,
    last_saved: Option<u64>,
}

impl<E: Engine> Orchestrator<E> {
    /// Creates a new `Orchestrator` around a built engine.
    ///
    /// # Errors
    /// If `train_dir` can't be created or holds a corrupt checkpoint index.
    pub fn new(cfg: RunConfig, engine: E) -> Result<Self> {
        let saver = Saver::new(&cfg.train_dir, cfg.max_to_keep)?;
        let summaries = SummaryWriter::new(&cfg.train_dir);

        Ok(Self {
            cfg,
            engine: Some(engine),
            saver,
            summaries,
            metrics: TrainMetrics::default(),
            phase: Phase::Build,
            last_saved: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Restores the engine, then trains it until `max_steps`.
    ///
    /// A checkpoint in `train_dir` takes precedence over `pretrained`. Pretrained weights are
    /// applied on a best effort basis.
    ///
    /// # Arguments
    /// * `batches` - The training data.
    /// * `pretrained` - An optional file with weights to seed the model with.
    ///
    /// # Returns
    /// The run's metrics, or the first error that halted it.
    pub async fn run(
        mut self,
        mut batches: BatchStream,
        pretrained: Option<&Path>,
    ) -> Result<(E, TrainMetrics)> {
        self.enter(Phase::Restore);
        let start_step = self.restore(pretrained)?;
        self.metrics.start_step = start_step;
        self.metrics.final_step = start_step;

        self.enter(Phase::Run);
        let mut last_summary = Instant::now();
        let mut last_checkpoint = Instant::now();

        while self.metrics.final_step < self.cfg.max_steps {
            let global_step = self.metrics.final_step;

            let started = Instant::now();
            let batch = batches.next().await?;
            self.metrics.data_time += started.elapsed();

            let started = Instant::now();
            let report = self.step(batch, global_step).await?;
            self.metrics.compute_time += started.elapsed();

            self.metrics.bump_step(report.total_loss);
            self.summaries.add_scalars(&report.scalars);

            let done = self.metrics.final_step;
            if done % LOG_EVERY == 0 {
                info!(
                    global_step = done;
                    "step {done}/{}: loss = {:.4}",
                    self.cfg.max_steps,
                    report.total_loss
                );
            }

            if last_summary.elapsed() >= self.cfg.summary_interval {
                self.flush_summaries()?;
                last_summary = Instant::now();
            }

            if last_checkpoint.elapsed() >= self.cfg.checkpoint_interval {
                self.enter(Phase::Checkpoint);
                self.checkpoint()?;
                last_checkpoint = Instant::now();
                self.enter(Phase::Run);
            }
        }

        // Drop the receiver first so the data workers stop.
        drop(batches);

        if self.last_saved != Some(self.metrics.final_step) {
            self.checkpoint()?;
        }
        self.flush_summaries()?;
        self.enter(Phase::Terminated);

        info!(
            "finished at step {} after {} steps, {} checkpoints",
            self.metrics.final_step, self.metrics.steps, self.metrics.checkpoints
        );

        let engine = self.take_engine()?;
        Ok((engine, self.metrics))
    }

    /// Resumes from `train_dir`, otherwise applies `pretrained`, otherwise starts cold.
    ///
    /// # Returns
    /// The global step to start from.
    fn restore(&mut self, pretrained: Option<&Path>) -> Result<u64> {
        if let Some(path) = checkpoint::latest_checkpoint(&self.cfg.train_dir)? {
            let state = checkpoint::load(&path)?;
            let global_step = self.engine_mut()?.restore_state(&state)?;
            self.last_saved = Some(global_step);
            info!(global_step = global_step; "resuming from {}", path.display());
            return Ok(global_step);
        }

        let Some(path) = pretrained else {
            info!("no checkpoint found, starting from scratch");
            return Ok(0);
        };

        match checkpoint::load(path) {
            Ok(file) => {
                let report = self.engine_mut()?.restore_variables(&file);
                info!(
                    "restored {} variables from {}",
                    report.restored.len(),
                    path.display()
                );
                for name in &report.missing {
                    debug!("{name} not found in pretrained weights, keeping its initial value");
                }
                if !report.mismatched.is_empty() {
                    warn!("skipped {} variables with mismatched shapes", report.mismatched.len());
                }
            }
            Err(e) => warn!("not using pretrained weights: {e}"),
        }

        Ok(0)
    }

    async fn step(&mut self, batch: Batch, global_step: u64) -> Result<StepReport> {
        let mut engine = self.take_engine()?;

        let (engine, report) = task::spawn_blocking(move || {
            let report = engine.step(&batch, global_step);
            (engine, report)
        })
        .await
        .map_err(|e| io::Error::other(format!("compute join error: {e}")))?;

        self.engine = Some(engine);
        report
    }

    fn checkpoint(&mut self) -> Result<()> {
        let started = Instant::now();
        let global_step = self.metrics.final_step;

        let state = self.engine_mut()?.save_state(global_step);
        self.saver.save(&state, global_step)?;

        self.last_saved = Some(global_step);
        self.metrics.bump_checkpoint(started.elapsed());
        Ok(())
    }

    fn flush_summaries(&mut self) -> Result<()> {
        if self.summaries.flush(self.metrics.final_step)? > 0 {
            self.metrics.bump_summary();
        }
        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{} -> {phase}", self.phase);
        self.phase = phase;
    }

    fn engine_mut(&mut self) -> Result<&mut E> {
        self.engine
            .as_mut()
            .ok_or_else(|| io::Error::other("engine lost by a failed step").into())
    }

    fn take_engine(&mut self) -> Result<E> {
        self.engine
            .take()
            .ok_or_else(|| io::Error::other("engine lost by a failed step").into())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ndarray::Array3;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        TrainErr,
        engine::{GLOBAL_STEP, RestoreReport},
        summary,
        tensors::{NamedTensor, TensorFile},
    };

    /// Counts its steps and keeps two variables, `a` is bumped by every step.
    #[derive(Debug, Default)]
    struct ScriptedEngine {
        a: Vec<f32>,
        b: Vec<f32>,
        steps: Vec<u64>,
        nan_at: Option<u64>,
    }

    impl ScriptedEngine {
        fn new() -> Self {
            Self {
                a: vec![0.; 2],
                b: vec![0.5; 3],
                ..Default::default()
            }
        }
    }

    impl Engine for ScriptedEngine {
        fn step(&mut self, _: &Batch, global_step: u64) -> Result<StepReport> {
            if self.nan_at == Some(global_step) {
                return Err(TrainErr::NonFiniteLoss {
                    step: global_step,
                    loss: f32::NAN,
                });
            }

            self.steps.push(global_step);
            self.a.iter_mut().for_each(|a| *a += 1.);
            let loss = 1. / (global_step + 1) as f32;

            Ok(StepReport {
                total_loss: loss,
                scalars: vec![("losses/total loss".to_string(), loss)],
            })
        }

        fn save_state(&self, global_step: u64) -> TensorFile {
            TensorFile {
                tensors: vec![
                    NamedTensor::new("a", vec![2], self.a.clone()),
                    NamedTensor::new("b", vec![3], self.b.clone()),
                ],
                metadata: HashMap::from([(GLOBAL_STEP.to_string(), global_step.to_string())]),
            }
        }

        fn restore_state(&mut self, state: &TensorFile) -> Result<u64> {
            self.a = state.get("a").unwrap().values.clone();
            self.b = state.get("b").unwrap().values.clone();
            Ok(state.metadata[GLOBAL_STEP].parse().unwrap())
        }

        fn restore_variables(&mut self, file: &TensorFile) -> RestoreReport {
            let mut report = RestoreReport::default();
            for (name, slot) in [("a", &mut self.a), ("b", &mut self.b)] {
                match file.get(name) {
                    Some(t) => {
                        *slot = t.values.clone();
                        report.restored.push(name.to_string());
                    }
                    None => report.missing.push(name.to_string()),
                }
            }
            report
        }
    }

    fn run_config(train_dir: &Path, max_steps: u64, checkpoint_interval: Duration) -> RunConfig {
        RunConfig {
            max_steps,
            summary_interval: Duration::from_secs(3600),
            checkpoint_interval,
            max_to_keep: Saver::MAX_TO_KEEP,
            train_dir: train_dir.to_path_buf(),
        }
    }

    fn batch() -> Batch {
        Batch::new(
            Array3::zeros((1, 2, 3)),
            Array3::zeros((1, 2, 1)),
            Array3::zeros((1, 2, 2)),
        )
        .unwrap()
    }

    /// A stream that yields `good` batches, then `last` if given, then closes.
    fn stream(good: usize, last: Option<TrainErr>) -> BatchStream {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for _ in 0..good {
                if tx.send(Ok(batch())).await.is_err() {
                    return;
                }
            }
            if let Some(e) = last {
                let _ = tx.send(Err(e)).await;
            }
        });
        BatchStream::new(rx)
    }

    fn latest_step(dir: &Path) -> u64 {
        let path = checkpoint::latest_checkpoint(dir).unwrap().unwrap();
        checkpoint::load(&path).unwrap().metadata[GLOBAL_STEP]
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn runs_exactly_max_steps() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = run_config(dir.path(), 100, Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();

        let (engine, metrics) = orchestrator.run(stream(1000, None), None).await.unwrap();

        assert_eq!(engine.steps, (0..100).collect::<Vec<_>>());
        assert_eq!(metrics.steps, 100);
        assert_eq!(metrics.final_step, 100);
        assert_eq!(metrics.last_loss, Some(0.01));
    }

    #[tokio::test]
    async fn zero_interval_checkpoints_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = run_config(dir.path(), 7, Duration::ZERO);
        let orchestrator = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();

        let (_, metrics) = orchestrator.run(stream(100, None), None).await.unwrap();

        assert_eq!(metrics.checkpoints, 7);
        assert_eq!(latest_step(dir.path()), 7);
        assert!(dir.path().join(checkpoint::checkpoint_name(3)).exists());
        assert!(!dir.path().join(checkpoint::checkpoint_name(2)).exists());
    }

    #[tokio::test]
    async fn final_checkpoint_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = run_config(dir.path(), 5, Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();

        let (_, metrics) = orchestrator.run(stream(100, None), None).await.unwrap();

        assert_eq!(metrics.checkpoints, 1);
        assert_eq!(latest_step(dir.path()), 5);

        let events = summary::read_events(&dir.path().join(summary::EVENTS_FILE)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step, 5);
    }

    #[tokio::test]
    async fn resumes_from_the_latest_checkpoint() {
        let dir = tempfile::tempdir().unwrap();

        let cfg = run_config(dir.path(), 4, Duration::from_secs(3600));
        let first = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();
        first.run(stream(100, None), None).await.unwrap();

        let cfg = run_config(dir.path(), 10, Duration::from_secs(3600));
        let second = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();
        let (engine, metrics) = second.run(stream(100, None), None).await.unwrap();

        assert_eq!(metrics.start_step, 4);
        assert_eq!(metrics.steps, 6);
        assert_eq!(engine.steps, (4..10).collect::<Vec<_>>());
        assert_eq!(engine.a, vec![10.; 2]);
        assert_eq!(latest_step(dir.path()), 10);
    }

    #[tokio::test]
    async fn finished_runs_do_not_step_again() {
        let dir = tempfile::tempdir().unwrap();

        let cfg = run_config(dir.path(), 3, Duration::from_secs(3600));
        Orchestrator::new(cfg.clone(), ScriptedEngine::new())
            .unwrap()
            .run(stream(100, None), None)
            .await
            .unwrap();

        let (engine, metrics) = Orchestrator::new(cfg, ScriptedEngine::new())
            .unwrap()
            .run(stream(0, None), None)
            .await
            .unwrap();

        assert!(engine.steps.is_empty());
        assert_eq!(metrics.checkpoints, 0);
        assert_eq!(metrics.final_step, 3);
    }

    #[tokio::test]
    async fn partial_pretrained_weights_keep_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let pretrained = dir.path().join("backbone.safetensors");
        let file = TensorFile {
            tensors: vec![NamedTensor::new("a", vec![2], vec![7., 7.])],
            metadata: HashMap::new(),
        };
        std::fs::write(
            &pretrained,
            crate::tensors::serialize(&file.tensors, file.metadata).unwrap(),
        )
        .unwrap();

        let cfg = run_config(&dir.path().join("train"), 0, Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();
        let (engine, _) = orchestrator
            .run(stream(0, None), Some(&pretrained))
            .await
            .unwrap();

        assert_eq!(engine.a, vec![7., 7.]);
        assert_eq!(engine.b, vec![0.5; 3]);
    }

    #[tokio::test]
    async fn missing_pretrained_weights_start_cold() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = run_config(dir.path(), 2, Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();

        let missing = dir.path().join("nope.safetensors");
        let (engine, metrics) = orchestrator
            .run(stream(100, None), Some(&missing))
            .await
            .unwrap();

        assert_eq!(metrics.steps, 2);
        assert_eq!(engine.b, vec![0.5; 3]);
    }

    #[tokio::test]
    async fn non_finite_loss_halts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = run_config(dir.path(), 100, Duration::from_secs(3600));
        let engine = ScriptedEngine {
            nan_at: Some(3),
            ..ScriptedEngine::new()
        };
        let orchestrator = Orchestrator::new(cfg, engine).unwrap();

        let err = orchestrator.run(stream(100, None), None).await.unwrap_err();

        assert!(matches!(err, TrainErr::NonFiniteLoss { step: 3, .. }));
        assert_eq!(checkpoint::latest_checkpoint(dir.path()).unwrap(), None);
    }

    #[tokio::test]
    async fn data_errors_halt() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = run_config(dir.path(), 100, Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();

        let bad = TrainErr::MalformedRecord {
            path: "clip.safetensors".into(),
            reason: "truncated".to_string(),
        };
        let err = orchestrator.run(stream(5, Some(bad)), None).await.unwrap_err();

        assert!(matches!(err, TrainErr::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn closed_pipeline_halts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = run_config(dir.path(), 100, Duration::from_secs(3600));
        let orchestrator = Orchestrator::new(cfg, ScriptedEngine::new()).unwrap();

        let err = orchestrator.run(stream(2, None), None).await.unwrap_err();

        assert!(matches!(err, TrainErr::DataPipelineClosed));
    }
}
