//! Error type
use crate::compiler::CompileError;
use crate::eval::EvalError;
use crate::planner::PlanError;
use thiserror::Error;

/// Error from the relaxplan crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("error compiling model")]
    Compile(#[from] CompileError),
    #[error("error evaluating model")]
    Eval(#[from] EvalError),
    #[error("error planning")]
    Plan(#[from] PlanError),
}
