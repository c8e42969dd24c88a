use std::time::Duration;

/// What a training run did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrainMetrics {
    pub data_time: Duration,
    pub compute_time: Duration,
    pub checkpoint_time: Duration,

    /// The global step the run started from.
    pub start_step: u64,
    /// The global step the run ended at.
    pub final_step: u64,
    /// Steps run by this process, not counting resumed ones.
    pub steps: u64,
    pub checkpoints: u64,
    pub summaries: u64,
    pub last_loss: Option<f32>,
}

impl TrainMetrics {
    #[inline]
    pub fn bump_step(&mut self, loss: f32) {
        self.steps += 1;
        self.final_step += 1;
        self.last_loss = Some(loss);
    }

    #[inline]
    pub fn bump_checkpoint(&mut self, elapsed: Duration) {
        self.checkpoints += 1;
        self.checkpoint_time += elapsed;
    }

    #[inline]
    pub fn bump_summary(&mut self) {
        self.summaries += 1;
    }
}
