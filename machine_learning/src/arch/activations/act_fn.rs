use super::{Relu, Tanh};

/// An element-wise activation function applied at the output of a layer.
#[derive(Debug, Clone)]
pub enum ActFn {
    Tanh(Tanh),
    Relu(Relu),
}

impl ActFn {
    pub fn tanh() -> Self {
        Self::Tanh(Tanh)
    }

    pub fn relu() -> Self {
        Self::Relu(Relu)
    }

    /// Evaluates the function at `z`.
    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Tanh(a) => a.f(z),
            Self::Relu(a) => a.f(z),
        }
    }

    /// Evaluates the derivative of the function at `z`.
    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Tanh(a) => a.df(z),
            Self::Relu(a) => a.df(z),
        }
    }
}
