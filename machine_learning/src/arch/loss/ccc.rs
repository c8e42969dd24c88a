use ndarray::{Array1, ArrayView1};

use super::LossFn;

/// Concordance correlation coefficient loss, `1 - ccc(y_pred, y)` where
///
/// `ccc = 2·cov(p, y) / (var(p) + var(y) + (mean(p) - mean(y))²)`
///
/// using population moments. Ranges over `[0, 2]` and reaches `0` only when the prediction
/// agrees with the target in correlation, scale and location.
///
/// If both series are constant and equal the denominator vanishes, in which case the
/// agreement is perfect and the loss is `0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcordanceCc;

impl ConcordanceCc {
    /// Returns a new `ConcordanceCc`.
    pub fn new() -> Self {
        Self
    }
}

struct Moments {
    n: f32,
    mean_y: f32,
    cov: f32,
    den: f32,
}

impl Moments {
    fn of(p: ArrayView1<f32>, y: ArrayView1<f32>) -> Option<Self> {
        let n = p.len() as f32;
        let mean_p = p.mean()?;
        let mean_y = y.mean()?;

        let (mut var_p, mut var_y, mut cov) = (0., 0., 0.);
        for (&p, &y) in p.iter().zip(y) {
            let (dp, dy) = (p - mean_p, y - mean_y);
            var_p += dp * dp;
            var_y += dy * dy;
            cov += dp * dy;
        }
        var_p /= n;
        var_y /= n;
        cov /= n;

        let den = var_p + var_y + (mean_p - mean_y).powi(2);

        Some(Self {
            n,
            mean_y,
            cov,
            den,
        })
    }
}

impl LossFn for ConcordanceCc {
    fn loss(&self, y_pred: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
        let Some(m) = Moments::of(y_pred, y) else {
            return 0.;
        };

        if m.den == 0. {
            return 0.;
        }

        1. - 2. * m.cov / m.den
    }

    // d cov / d p_i = (y_i - mean_y) / n
    // d den / d p_i = 2 (p_i - mean_y) / n
    fn loss_prime(&self, y_pred: ArrayView1<f32>, y: ArrayView1<f32>) -> Array1<f32> {
        let Some(m) = Moments::of(y_pred, y) else {
            return Array1::zeros(y_pred.len());
        };

        if m.den == 0. {
            return Array1::zeros(y_pred.len());
        }

        let num = 2. * m.cov;
        let den2 = m.den * m.den;

        y_pred
            .iter()
            .zip(y)
            .map(|(&p, &y)| {
                let d_num = 2. * (y - m.mean_y) / m.n;
                let d_den = 2. * (p - m.mean_y) / m.n;
                -(d_num * m.den - num * d_den) / den2
            })
            .collect()
    }
}
