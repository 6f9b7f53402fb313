//! Single-step evaluation of a compiled model.
//!
//! One [`Evaluator`] type serves both backends: the [`Logic`] it is constructed with decides
//! whether operators are exact or relaxed and whether samples are exact or reparameterized.
mod expr;

use crate::compiler::{CompileError, CompiledModel, FluentInfo};
use crate::logic::{ExactLogic, Logic, Operator, ProductLogic};
use crate::model::{Expr, FluentKind};
use crate::reparam::reparameterization;
use crate::utils::tensor::any;
use crate::{Fluents, Prng};
use expr::Context;
use rand::SeedableRng;
use std::sync::Arc;
use tch::{Kind, Tensor};
use thiserror::Error;

/// Error evaluating a step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("<{fluent}> has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        fluent: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },
    #[error("no state or action fluent named <{name}>")]
    UnknownFluent { name: String },
    #[error("undefined type <{name}>")]
    UndefinedType { name: String },
    #[error("undefined object <{name}>")]
    UndefinedObject { name: String },
    #[error("unbound variable {var} (in {context})")]
    UnboundVariable { var: String, context: String },
    #[error("domain violation in {op}: {detail} (in {context})")]
    DomainViolation {
        op: String,
        detail: String,
        context: String,
    },
    #[error("index {index} of <{fluent}> is outside 0..{size} (in {context})")]
    IndexOutOfRange {
        fluent: String,
        index: i64,
        size: i64,
        context: String,
    },
    #[error("precondition {index} is violated")]
    PreconditionViolated { index: usize },
    #[error("no action for step {step}")]
    PlanExhausted { step: usize },
}

/// Result of one step.
#[derive(Debug)]
pub struct Transition {
    /// Next value of every state fluent. Shape `[batch, shape...]`.
    pub next_state: Fluents,
    /// Value of every interm fluent at this step.
    pub interms: Fluents,
    /// Reward of this step. Shape `[batch]`.
    pub reward: Tensor,
}

/// Evaluates the update functions and reward of a compiled model.
///
/// Holds no state between calls.
#[derive(Debug, Clone)]
pub struct Evaluator<L = ExactLogic> {
    model: Arc<CompiledModel>,
    logic: L,
}

/// Evaluator with the default product-form relaxation.
pub type RelaxedEvaluator = Evaluator<ProductLogic>;

impl Evaluator<ExactLogic> {
    pub fn exact(model: Arc<CompiledModel>) -> Self {
        Self {
            model,
            logic: ExactLogic,
        }
    }
}

impl<L: Logic> Evaluator<L> {
    /// Create an evaluator using the given logic.
    ///
    /// # Errors
    /// If an expression uses an operator that the logic does not support, or, for an inexact
    /// logic, a distribution without a reparameterization.
    pub fn new(model: Arc<CompiledModel>, logic: L) -> Result<Self, CompileError> {
        for (context, expr) in model.expressions() {
            let mut error = None;
            expr.visit(&mut |e: &Expr| {
                if error.is_some() {
                    return;
                }
                if let Some(op) = Operator::of(e) {
                    if !logic.supports(op) {
                        error = Some(CompileError::UnsupportedRelaxation {
                            op: op.to_string(),
                            context: context.clone(),
                        });
                    }
                }
                if let Expr::Sample(dist) = e {
                    if !logic.is_exact() && reparameterization(dist).is_none() {
                        error = Some(CompileError::NonReparameterizable {
                            distribution: dist.name(),
                            context: context.clone(),
                        });
                    }
                }
            });
            if let Some(error) = error {
                return Err(error);
            }
        }
        Ok(Self { model, logic })
    }

    pub const fn model(&self) -> &Arc<CompiledModel> {
        &self.model
    }

    pub const fn logic(&self) -> &L {
        &self.logic
    }

    /// Evaluate one step.
    ///
    /// Missing state and action values take their initial and default values.
    /// Provided values have shape `[shape...]` or `[batch, shape...]`; the batch size of the
    /// step is the largest provided leading dimension.
    pub fn step(
        &self,
        state: &Fluents,
        actions: &Fluents,
        rng: &mut Prng,
    ) -> Result<Transition, EvalError> {
        let (values, batch) = self.inputs(state, actions)?;
        let mut context = Context {
            model: &self.model,
            logic: &self.logic,
            values,
            batch,
            rng,
            context: String::new(),
        };
        let order = self.model.order();
        let mut interms = Fluents::new();
        for name in &order.interms {
            let value = context.cpf(name)?;
            context.values.insert(name.clone(), value.shallow_clone());
            interms.insert(name.clone(), value);
        }
        let mut next_state = Fluents::new();
        for name in &order.states {
            next_state.insert(name.clone(), context.cpf(name)?);
        }
        let reward = context.root(&self.model.model().reward, "reward")?;
        Ok(Transition {
            next_state,
            interms,
            reward,
        })
    }

    /// Check the state-action constraints of the model with the exact logic.
    ///
    /// A constraint holds if it holds for every batch element.
    /// Constraints containing samples use a fixed seed.
    pub fn check_preconditions(&self, state: &Fluents, actions: &Fluents) -> Result<(), EvalError> {
        let (values, batch) = self.inputs(state, actions)?;
        let mut rng = Prng::seed_from_u64(0);
        let mut context = Context {
            model: &self.model,
            logic: &ExactLogic,
            values,
            batch,
            rng: &mut rng,
            context: String::new(),
        };
        for (index, precondition) in self.model.model().preconditions.iter().enumerate() {
            let holds = context.root(precondition, &format!("precondition {}", index))?;
            if any(&holds.le(0.5)) {
                return Err(EvalError::PreconditionViolated { index });
            }
        }
        Ok(())
    }

    /// Complete a state: missing state fluents take their initial values.
    ///
    /// Every value of the result has a leading batch axis.
    pub fn full_state(&self, state: &Fluents) -> Result<Fluents, EvalError> {
        let mut full = self.model.initial_state();
        for (name, value) in state {
            match self.model.fluent(name) {
                Some(info) if info.kind == FluentKind::State => {
                    full.insert(name.clone(), batched(info, value)?);
                }
                _ => return Err(EvalError::UnknownFluent { name: name.clone() }),
            }
        }
        Ok(full)
    }

    /// Values of all readable fluents and the batch size.
    fn inputs(&self, state: &Fluents, actions: &Fluents) -> Result<(Fluents, i64), EvalError> {
        let mut provided = Vec::with_capacity(state.len() + actions.len());
        for (values, kind) in [(state, FluentKind::State), (actions, FluentKind::Action)] {
            for (name, value) in values {
                match self.model.fluent(name) {
                    Some(info) if info.kind == kind => provided.push((info, batched(info, value)?)),
                    _ => return Err(EvalError::UnknownFluent { name: name.clone() }),
                }
            }
        }
        let batch = provided
            .iter()
            .map(|(_, value)| value.size()[0])
            .max()
            .unwrap_or(1);

        let mut values: Fluents = self
            .model
            .fluents()
            .filter_map(|info| {
                self.model
                    .initial_value(&info.name)
                    .map(|value| (info.name.clone(), value.shallow_clone()))
            })
            .collect();
        for (info, value) in provided {
            let leading = value.size()[0];
            if leading != 1 && leading != batch {
                return Err(EvalError::ShapeMismatch {
                    fluent: info.name.clone(),
                    expected: info.batched_shape(batch),
                    actual: value.size(),
                });
            }
            values.insert(info.name.clone(), value);
        }
        Ok((values, batch))
    }
}

/// Add a unit batch axis to an unbatched value.
fn batched(info: &FluentInfo, value: &Tensor) -> Result<Tensor, EvalError> {
    let value = value.to_kind(Kind::Double);
    let size = value.size();
    if size == info.shape {
        Ok(value.unsqueeze(0))
    } else if size.len() == info.shape.len() + 1 && size[1..] == info.shape[..] {
        Ok(value)
    } else {
        Err(EvalError::ShapeMismatch {
            fluent: info.name.clone(),
            expected: info.shape.clone(),
            actual: size,
        })
    }
}
