use rayon::prelude::*;

use super::Optimizer;
use crate::{MlErr, Result};

/// The moving averages and bias correction terms of an `Adam` optimizer, everything needed to
/// resume optimization where it was left.
#[derive(Debug, Clone, PartialEq)]
pub struct AdamState {
    pub m: Vec<f32>,
    pub v: Vec<f32>,
    pub beta1_power: f32,
    pub beta2_power: f32,
}

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    m: Box<[f32]>,
    v: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    pub const BETA1: f32 = 0.9;
    pub const BETA2: f32 = 0.999;
    pub const EPSILON: f32 = 1e-8;

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            m: vec![0.; len].into_boxed_slice(),
            v: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    /// Creates a new `Adam` optimizer with the usual hyperparameters.
    pub fn with_defaults(len: usize, learning_rate: f32) -> Self {
        Self::new(len, learning_rate, Self::BETA1, Self::BETA2, Self::EPSILON)
    }

    /// Returns a copy of the optimizer's internal state.
    pub fn state(&self) -> AdamState {
        AdamState {
            m: self.m.to_vec(),
            v: self.v.to_vec(),
            beta1_power: self.beta1_t,
            beta2_power: self.beta2_t,
        }
    }

    /// Replaces the optimizer's internal state.
    ///
    /// # Returns
    /// An error if the state was built for a different amount of parameters.
    pub fn load_state(&mut self, state: AdamState) -> Result<()> {
        for (what, got) in [("adam m", state.m.len()), ("adam v", state.v.len())] {
            if got != self.m.len() {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected: self.m.len(),
                });
            }
        }

        self.m = state.m.into_boxed_slice();
        self.v = state.v.into_boxed_slice();
        self.beta1_t = state.beta1_power;
        self.beta2_t = state.beta2_power;
        Ok(())
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        for (what, got) in [("gradient", grad.len()), ("parameters", params.len())] {
            if got != self.m.len() {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected: self.m.len(),
                });
            }
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .par_iter_mut()
            .zip(grad.par_iter())
            .zip(self.m.par_iter_mut())
            .zip(self.v.par_iter_mut())
            .for_each(|(((p, g), m), v)| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g.powi(2);
                *p -= step_size * *m / (v.sqrt() + eps);
            });

        Ok(())
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}
