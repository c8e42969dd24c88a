use std::{collections::HashMap, ops::Range};

use log::trace;

use super::Variable;
use crate::{MlErr, Result, initialization::ParamGen};

/// Owns every trainable parameter of a model as a single flat buffer, alongside a gradient
/// buffer of the same length, and keeps track of which slice belongs to which named variable.
///
/// Variables are laid out contiguously in registration order, so a model that registers the
/// variables of a layer one after the other can address that layer with a single range.
#[derive(Debug, Default, Clone)]
pub struct ParamStore {
    vars: Vec<Variable>,
    index: HashMap<String, usize>,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl ParamStore {
    /// Creates an empty `ParamStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new variable and fills it with values drawn from `init`.
    ///
    /// # Arguments
    /// * `name` - A unique name for the variable.
    /// * `shape` - The variable's shape.
    /// * `init` - The generator for the variable's initial values.
    ///
    /// # Returns
    /// The range the variable occupies in the flat buffer.
    pub fn register<G>(
        &mut self,
        name: impl Into<String>,
        shape: &[usize],
        init: &mut G,
    ) -> Result<Range<usize>>
    where
        G: ParamGen + ?Sized,
    {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(MlErr::DuplicateVariable(name));
        }

        let var = Variable::new(name.clone(), shape.to_vec(), self.params.len());
        let values = init
            .fill(var.len())
            .map_err(|missing| MlErr::GeneratorExhausted {
                name: name.clone(),
                missing,
            })?;
        self.params.extend(values);

        self.grad.resize(self.params.len(), 0.);
        let range = var.range();
        trace!("registered {name} {shape:?} at {range:?}");
        self.index.insert(name, self.vars.len());
        self.vars.push(var);

        Ok(range)
    }

    /// Returns the total amount of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Gives read access to the parameters and write access to the gradient at the same time,
    /// which is what a backward pass needs.
    pub fn params_and_grad_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.params, &mut self.grad)
    }

    /// Gives read access to the gradient and write access to the parameters at the same time,
    /// which is what an optimizer step needs.
    pub fn grad_and_params_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.grad, &mut self.params)
    }

    /// Resets the gradient buffer to zero.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// The registered variables, in registration order.
    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&i| &self.vars[i])
    }

    /// Returns the current values of the variable called `name`.
    pub fn values(&self, name: &str) -> Result<&[f32]> {
        let var = self
            .variable(name)
            .ok_or_else(|| MlErr::UnknownVariable(name.to_string()))?;

        Ok(&self.params[var.range()])
    }

    /// Overwrites the values of the variable called `name`.
    ///
    /// # Arguments
    /// * `name` - The variable's name.
    /// * `shape` - The shape of `values`, must match the variable's shape.
    /// * `values` - The new values.
    pub fn assign(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<()> {
        let var = self
            .variable(name)
            .ok_or_else(|| MlErr::UnknownVariable(name.to_string()))?;

        if var.shape() != shape {
            return Err(MlErr::ShapeMismatch {
                name: name.to_string(),
                got: shape.to_vec(),
                expected: var.shape().to_vec(),
            });
        }

        if var.len() != values.len() {
            return Err(MlErr::SizeMismatch {
                what: "assigned values",
                got: values.len(),
                expected: var.len(),
            });
        }

        let range = var.range();
        self.params[range].copy_from_slice(values);
        Ok(())
    }

    /// Computes the euclidean norm of the whole gradient.
    pub fn grad_norm(&self) -> f32 {
        norm(&self.grad)
    }

    /// The euclidean norm of each variable's gradient, in registration order.
    pub fn variable_grad_norms(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.vars
            .iter()
            .map(|var| (var.name(), norm(&self.grad[var.range()])))
    }
}

fn norm(values: &[f32]) -> f32 {
    values.iter().map(|g| g * g).sum::<f32>().sqrt()
}
