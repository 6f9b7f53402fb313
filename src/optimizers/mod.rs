//! First-order optimizers of plan parameters.
mod coptimizer;

pub use coptimizer::{AdamConfig, OptimizerConfig, RmsPropConfig, SgdConfig};

use std::error::Error;
use tch::{nn::VarStore, TchError, Tensor};
use thiserror::Error;

pub trait BaseOptimizer {
    /// Zero out the gradients of all optimized tensors
    fn zero_grad(&mut self) -> Result<(), OptimizerStepError>;
}

/// Optimizer that minimizes a loss tensor with one gradient evaluation per step.
pub trait OnceOptimizer: BaseOptimizer {
    /// Update the parameters from the gradients already stored with them.
    fn step_once(&mut self) -> Result<(), OptimizerStepError>;

    /// Back-propagate a scalar loss and update the parameters.
    ///
    /// A NaN loss is rejected before any parameter is modified.
    fn backward_step_once(&mut self, loss: &Tensor) -> Result<(), OptimizerStepError>;
}

/// Error performing an optimization step.
#[derive(Debug, Error)]
pub enum OptimizerStepError {
    #[error("loss is NaN")]
    NaNLoss,
    #[error(transparent)]
    Torch(#[from] TchError),
}

/// Build an optimizer
pub trait BuildOptimizer {
    type Optimizer;
    type Error: Error;

    /// Build an optimizer for the trainable variables in a variable store.
    fn build_optimizer(&self, vs: &VarStore) -> Result<Self::Optimizer, Self::Error>;
}
