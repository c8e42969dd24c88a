mod ccc;
mod loss_fn;
mod mse;

pub use ccc::ConcordanceCc;
pub use loss_fn::LossFn;
pub use mse::Mse;
