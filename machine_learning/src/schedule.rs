/// A staircase exponential decay of the learning rate:
/// `lr(step) = initial · factor^floor(step / decay_steps)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialDecay {
    initial: f32,
    decay_steps: u64,
    factor: f32,
}

impl ExponentialDecay {
    /// Creates a new `ExponentialDecay`.
    ///
    /// # Arguments
    /// * `initial` - The learning rate at step 0.
    /// * `decay_steps` - The amount of steps between decays, clamped to at least 1.
    /// * `factor` - The multiplier applied at each decay.
    pub fn new(initial: f32, decay_steps: u64, factor: f32) -> Self {
        Self {
            initial,
            decay_steps: decay_steps.max(1),
            factor,
        }
    }

    /// Builds the schedule from epoch based settings.
    ///
    /// # Arguments
    /// * `initial` - The learning rate at step 0.
    /// * `samples_per_epoch` - The amount of samples in an epoch.
    /// * `batch_size` - The amount of samples per step.
    /// * `epochs_per_decay` - The amount of epochs between decays.
    /// * `factor` - The multiplier applied at each decay.
    pub fn from_epochs(
        initial: f32,
        samples_per_epoch: usize,
        batch_size: usize,
        epochs_per_decay: f32,
        factor: f32,
    ) -> Self {
        let steps_per_epoch = samples_per_epoch as f32 / batch_size.max(1) as f32;
        let decay_steps = (steps_per_epoch * epochs_per_decay).max(0.) as u64;
        Self::new(initial, decay_steps, factor)
    }

    pub fn decay_steps(&self) -> u64 {
        self.decay_steps
    }

    /// The learning rate to use at `step`.
    pub fn learning_rate(&self, step: u64) -> f32 {
        let exponent = (step / self.decay_steps).min(i32::MAX as u64) as i32;
        self.initial * self.factor.powi(exponent)
    }
}
