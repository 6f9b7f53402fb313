//! Gradient-based planning in declarative stochastic transition models.
//!
//! A [`Model`] is compiled once into a [`CompiledModel`] and then evaluated either exactly or
//! through a differentiable relaxation. A [`Planner`] optimizes straight-line plans by
//! back-propagating the relaxed return of batched roll-outs.
#![warn(clippy::cast_lossless)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::for_kv_map)] // part of warn(clippy::all), specifically style?
#![warn(clippy::missing_const_for_fn)] // has some false positives
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::redundant_closure_for_method_calls)]
#![warn(clippy::use_self)] // also triggered by macro expansions
pub mod compiler;
mod error;
pub mod eval;
pub mod logging;
pub mod logic;
pub mod model;
pub mod optimizers;
pub mod planner;
pub mod reparam;
pub mod rollout;
pub mod utils;

pub use compiler::{compile, CompileError, CompiledModel, FluentInfo};
pub use error::Error;
pub use eval::{EvalError, Evaluator, RelaxedEvaluator, Transition};
pub use logic::{ExactLogic, Logic, ProductLogic};
pub use model::Model;
pub use planner::{PlanError, Planner, PlannerConfig, PlannerStatus, Progress};
pub use rollout::{rollout, rollout_until, FnPolicy, Policy, Rollout};

use std::collections::BTreeMap;
use tch::Tensor;

/// Values of fluents by name. Each has shape `[batch, shape...]`.
pub type Fluents = BTreeMap<String, Tensor>;

/// Pseudo-random number generator for all sampling.
pub type Prng = rand_chacha::ChaCha8Rng;
