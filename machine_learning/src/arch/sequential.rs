use std::ops::Range;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::layers::Layer;
use crate::{
    MlErr, Result,
    initialization::{ConstParamGen, RandParamGen},
    params::ParamStore,
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    /// The amount of outputs of the last layer.
    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|layer| layer.dim().1).unwrap_or_default()
    }

    /// Registers every layer's variables in `store` under `scope`, weights with Xavier uniform
    /// values and biases with zeros.
    ///
    /// # Arguments
    /// * `scope` - The prefix for the variable names, `{scope}/dense_{i}/{weights,biases}`.
    /// * `store` - The store that will own the parameters.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// The contiguous range this model's parameters occupy in the store.
    pub fn init_params<R: Rng>(
        &self,
        scope: &str,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Range<usize>> {
        let start = store.len();

        for (i, layer) in self.layers.iter().enumerate() {
            let (fan_in, fan_out) = layer.dim();

            let mut weights = RandParamGen::xavier_uniform(rng, fan_in * fan_out, fan_in, fan_out)?;
            store.register(
                format!("{scope}/dense_{i}/weights"),
                &[fan_in, fan_out],
                &mut weights,
            )?;

            let mut biases = ConstParamGen::zeros(fan_out);
            store.register(format!("{scope}/dense_{i}/biases"), &[fan_out], &mut biases)?;
        }

        Ok(start..store.len())
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len("sequential parameters", params.len())?;

        let mut rest = params;
        let mut a = x.to_owned();

        for layer in self.layers.iter_mut() {
            let (layer_params, tail) = rest.split_at(layer.size());
            a = layer.forward(layer_params, a.view())?;
            rest = tail;
        }

        Ok(a)
    }

    /// Backpropagates `d`, the derivative of the loss with respect to the last output, through
    /// every layer accumulating into `grad`.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the input of the last forward pass.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.check_len("sequential parameters", params.len())?;
        self.check_len("sequential gradient", grad.len())?;

        let mut end = params.len();
        for layer in self.layers.iter_mut().rev() {
            let range = end - layer.size()..end;
            d = layer.backward(&params[range.clone()], &mut grad[range.clone()], d)?;
            end = range.start;
        }

        Ok(d)
    }

    /// Computes the L2 penalty `Σ w² / 2` over the weights (biases are excluded).
    pub fn weight_penalty(&self, params: &[f32]) -> f32 {
        self.weight_ranges()
            .map(|range| params[range].iter().map(|w| w * w).sum::<f32>())
            .sum::<f32>()
            / 2.
    }

    /// Adds `scale · w` to the gradient of every weight, the derivative of
    /// `scale · weight_penalty`.
    pub fn add_weight_penalty_grad(&self, params: &[f32], grad: &mut [f32], scale: f32) {
        for range in self.weight_ranges() {
            grad[range.clone()]
                .iter_mut()
                .zip(&params[range])
                .for_each(|(g, w)| *g += scale * w);
        }
    }

    fn weight_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.layers.iter().scan(0, |offset, layer| {
            let start = *offset;
            *offset += layer.size();
            Some(start..start + layer.weights_len())
        })
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::activations::ActFn;

    fn model() -> Sequential {
        Sequential::new([
            Layer::dense((2, 3), Some(ActFn::tanh())),
            Layer::dense((3, 1), None),
        ])
    }

    #[test]
    fn registers_named_variables() {
        let model = model();
        let mut store = ParamStore::new();
        let mut rng = StdRng::seed_from_u64(0);

        let range = model.init_params("net", &mut store, &mut rng).unwrap();

        assert_eq!(range, 0..model.size());
        assert_eq!(store.variable("net/dense_0/weights").unwrap().shape(), &[2, 3]);
        assert_eq!(store.variable("net/dense_1/biases").unwrap().shape(), &[1]);
        assert!(store.values("net/dense_0/weights").unwrap().iter().any(|&w| w != 0.));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut model = model();
        let mut store = ParamStore::new();
        let mut rng = StdRng::seed_from_u64(3);
        model.init_params("net", &mut store, &mut rng).unwrap();

        let x = array![[0.5f32, -1.0], [1.5, 0.25]];
        let loss = |model: &mut Sequential, params: &[f32]| {
            model.forward(params, x.view()).unwrap().sum()
        };

        let (params, grad) = store.params_and_grad_mut();
        let y = model.forward(params, x.view()).unwrap();
        model
            .backward(params, grad, Array2::ones(y.raw_dim()))
            .unwrap();
        let analytic = grad.to_vec();

        let eps = 1e-3;
        let mut shifted = params.to_vec();
        for i in 0..shifted.len() {
            let original = shifted[i];
            shifted[i] = original + eps;
            let up = loss(&mut model, &shifted);
            shifted[i] = original - eps;
            let down = loss(&mut model, &shifted);
            shifted[i] = original;

            let numeric = (up - down) / (2. * eps);
            assert!(
                (numeric - analytic[i]).abs() < 1e-2,
                "param {i}: numeric {numeric} analytic {}",
                analytic[i]
            );
        }
    }

    #[test]
    fn weight_penalty_skips_biases() {
        let model = Sequential::new([Layer::dense((1, 2), None)]);
        let params = [1f32, 2., 10., 10.];
        let mut grad = [0f32; 4];

        assert_eq!(model.weight_penalty(&params), 2.5);

        model.add_weight_penalty_grad(&params, &mut grad, 0.5);
        assert_eq!(grad, [0.5, 1., 0., 0.]);
    }
}
