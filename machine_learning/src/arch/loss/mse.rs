use ndarray::{Array1, ArrayView1};

use super::LossFn;

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView1<f32>, y: ArrayView1<f32>) -> Array1<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn mse() {
        let y_pred = array![1., 2., 3.];
        let y = array![1., 0., 0.];

        assert_eq!(Mse.loss(y_pred.view(), y.view()), 13. / 3.);
        assert_eq!(Mse.loss(y.view(), y.view()), 0.);
        assert_eq!(
            Mse.loss_prime(y_pred.view(), y.view()),
            array![0., 4. / 3., 2.]
        );
    }
}
