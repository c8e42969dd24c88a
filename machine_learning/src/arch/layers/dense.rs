use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer, `a = act_fn(x · w + b)`.
///
/// The layer doesn't own its parameters, they are handed in on every pass as a flat slice laid
/// out as the row-major `(dim.0, dim.1)` weights followed by the `dim.1` biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs of the layer.
    /// * `act_fn` - An optional activation function applied to the outputs.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: None,
            z: None,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Returns the amount of parameters that belong to the weights.
    pub fn weights_len(&self) -> usize {
        self.size - self.dim.1
    }

    /// Computes the layer's output, caching what the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - This layer's parameter slice.
    /// * `x` - The input of shape `(n, dim.0)`.
    ///
    /// # Returns
    /// The output of shape `(n, dim.1)`.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input columns",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let z = x.dot(&w) + &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.x = Some(x.to_owned());
        self.z = Some(z);
        Ok(a)
    }

    /// Accumulates this layer's gradient into `grad` and returns the delta for the previous
    /// layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameter slice.
    /// * `grad` - This layer's gradient slice.
    /// * `d` - The derivative of the loss with respect to this layer's output.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let (Some(x), Some(z)) = (&self.x, &self.z) else {
            return Err(MlErr::BackwardBeforeForward);
        };

        if d.dim() != z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense output delta",
                got: d.len(),
                expected: z.len(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense gradient", grad.len())?;

        let (dw_raw, db_raw) = grad.split_at_mut(self.weights_len());
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).map_err(|_| self.size_err(0))?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).map_err(|_| self.size_err(0))?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense parameters", params.len())?;

        let (w_raw, b_raw) = params.split_at(self.weights_len());
        let weights = ArrayView2::from_shape(self.dim, w_raw).map_err(|_| self.size_err(0))?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw).map_err(|_| self.size_err(0))?;
        Ok((weights, biases))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }

    fn size_err(&self, got: usize) -> MlErr {
        MlErr::SizeMismatch {
            what: "dense layout",
            got,
            expected: self.size,
        }
    }
}
