use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;

/// The training driver's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// All errors that can occur while training.
#[derive(Debug)]
pub enum TrainErr {
    /// Invalid configuration, caught before training starts.
    InvalidConfig(String),
    /// The requested model isn't registered.
    UnknownModel(String),
    /// A dataset split has no records.
    EmptySplit { dir: PathBuf },
    /// A record on disk can't be turned into a training sample.
    MalformedRecord { path: PathBuf, reason: String },
    /// Two arrays that should agree in shape don't.
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// Every data worker stopped before the step budget was exhausted.
    DataPipelineClosed,
    /// The loss diverged.
    NonFiniteLoss { step: u64, loss: f32 },
    /// A checkpoint couldn't be written or read.
    Checkpoint { path: PathBuf, reason: String },
    /// A saved training state doesn't fit the model being trained.
    InvalidState(String),
    /// The numerical engine failed.
    Ml(MlErr),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::UnknownModel(name) => {
                write!(f, "unknown model {name:?}, expected one of audio, video or both")
            }
            Self::EmptySplit { dir } => write!(f, "no records found in {}", dir.display()),
            Self::MalformedRecord { path, reason } => {
                write!(f, "malformed record {}: {reason}", path.display())
            }
            Self::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch in {what}: got {got:?}, expected {expected:?}"),
            Self::DataPipelineClosed => write!(f, "the data pipeline closed unexpectedly"),
            Self::NonFiniteLoss { step, loss } => {
                write!(f, "loss is {loss} at step {step}, training diverged")
            }
            Self::Checkpoint { path, reason } => {
                write!(f, "checkpoint error at {}: {reason}", path.display())
            }
            Self::InvalidState(reason) => write!(f, "invalid training state: {reason}"),
            Self::Ml(e) => write!(f, "engine error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for TrainErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
