//! Turns a prediction into the scalar that gets optimized.
//!
//! Every emotion dimension is flattened over the batch and time axes and scored on its own with
//! the concordance correlation loss. The optimized loss is the equal weighted average of both
//! dimensions plus whatever regularization the model contributes. The mean squared error is
//! only reported.

use machine_learning::arch::loss::{ConcordanceCc, LossFn, Mse};
use ndarray::{Array1, Array3, ArrayView3, s};

use crate::{TrainErr, error::Result};

/// The annotated emotion dimensions, in the order of the prediction's last axis.
pub const DIMENSIONS: [&str; 2] = ["arousal", "valence"];

/// The losses of one emotion dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionLoss {
    pub name: &'static str,
    pub ccc_loss: f32,
    pub mse: f32,
}

/// Everything computed from one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct LossReport {
    pub dimensions: Vec<DimensionLoss>,
    pub regularization: f32,
    pub total: f32,
    /// The derivative of `total` with respect to the prediction, excluding regularization.
    pub d_prediction: Array3<f32>,
}

impl LossReport {
    /// The named scalars worth recording for this step.
    pub fn scalars(&self) -> Vec<(String, f32)> {
        let mut scalars = Vec::with_capacity(2 * self.dimensions.len() + 2);

        for d in &self.dimensions {
            scalars.push((format!("losses/{} loss", d.name), d.ccc_loss));
            scalars.push((format!("losses/mse {} loss", d.name), d.mse));
        }

        scalars.push(("losses/regularization loss".to_string(), self.regularization));
        scalars.push(("losses/total loss".to_string(), self.total));
        scalars
    }
}

/// Combines per dimension losses into the optimized loss, `Σ loss / 2`.
pub fn combine(dimension_losses: &[f32]) -> f32 {
    dimension_losses.iter().map(|loss| loss / 2.).sum()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LossAggregator {
    ccc: ConcordanceCc,
    mse: Mse,
}

impl LossAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scores `prediction` against `ground_truth`, both shaped `(batch, time, 2)`.
    ///
    /// # Arguments
    /// * `prediction` - The model's output.
    /// * `ground_truth` - The annotations.
    /// * `regularization` - The model's auxiliary loss, added as is to the total.
    pub fn compute(
        &self,
        prediction: ArrayView3<f32>,
        ground_truth: ArrayView3<f32>,
        regularization: f32,
    ) -> Result<LossReport> {
        let (b, t, k) = prediction.dim();
        if prediction.dim() != ground_truth.dim() || k != DIMENSIONS.len() {
            return Err(TrainErr::ShapeMismatch {
                what: "prediction",
                got: prediction.shape().to_vec(),
                expected: vec![ground_truth.dim().0, ground_truth.dim().1, DIMENSIONS.len()],
            });
        }

        let mut dimensions = Vec::with_capacity(k);
        let mut d_prediction = Array3::zeros((b, t, k));

        for (i, name) in DIMENSIONS.into_iter().enumerate() {
            let pred = flatten(prediction.slice(s![.., .., i]).iter());
            let gt = flatten(ground_truth.slice(s![.., .., i]).iter());

            let ccc_loss = self.ccc.loss(pred.view(), gt.view());
            let mse = self.mse.loss(pred.view(), gt.view());

            let d = self.ccc.loss_prime(pred.view(), gt.view()) / 2.;
            d_prediction
                .slice_mut(s![.., .., i])
                .iter_mut()
                .zip(&d)
                .for_each(|(slot, &d)| *slot = d);

            dimensions.push(DimensionLoss {
                name,
                ccc_loss,
                mse,
            });
        }

        let losses: Vec<f32> = dimensions.iter().map(|d| d.ccc_loss).collect();
        let total = combine(&losses) + regularization;

        Ok(LossReport {
            dimensions,
            regularization,
            total,
            d_prediction,
        })
    }
}

fn flatten<'a>(values: impl Iterator<Item = &'a f32>) -> Array1<f32> {
    values.copied().collect()
}
