use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    UnknownVariable(String),
    DuplicateVariable(String),
    GeneratorExhausted {
        name: String,
        missing: usize,
    },
    InvalidDistribution(String),
    BackwardBeforeForward,
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "The variable {name} has shape {expected:?} but was given shape {got:?}"
            ),
            MlErr::UnknownVariable(name) => write!(f, "There is no variable named {name}"),
            MlErr::DuplicateVariable(name) => {
                write!(f, "A variable named {name} is already registered")
            }
            MlErr::GeneratorExhausted { name, missing } => write!(
                f,
                "The initializer for {name} ran out of values, {missing} were missing"
            ),
            MlErr::InvalidDistribution(msg) => write!(f, "Invalid distribution: {msg}"),
            MlErr::BackwardBeforeForward => {
                write!(f, "Tried to run a backward pass before a forward pass")
            }
        }
    }
}

impl Error for MlErr {}
