//! Gradient-based planning of straight-line action sequences.
//!
//! A plan holds one value per action fluent and step. Each epoch rolls the plan out through the
//! relaxed model over a batch of independent noise draws, ascends the gradient of the mean
//! return and projects the plan back onto the action constraints. The discretized plan is
//! periodically rolled out through the exact model to measure its realized return.
mod projection;

pub use projection::{clip, project_cardinality, select_top};

use crate::compiler::{CompileError, CompiledModel, FluentInfo};
use crate::eval::{EvalError, Evaluator};
use crate::logging::{Event, Loggable, Logger};
use crate::logic::ProductLogic;
use crate::model::{Bounds, FluentKind, ValueRange};
use crate::optimizers::{BuildOptimizer, OnceOptimizer, OptimizerConfig, OptimizerStepError};
use crate::rollout::{rollout, FnPolicy};
use crate::utils::tensor::{expand_batch, OPTIONS};
use crate::{Fluents, Prng};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tch::{nn::VarStore, COptimizer, Device, Kind, TchError, Tensor};
use thiserror::Error;

/// Planner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Number of planned steps. Defaults to the horizon of the model.
    pub horizon: Option<usize>,
    /// Sharpness of the relaxation.
    pub weight: f64,
    /// Hard argmax in the forward pass of relaxed roll-outs.
    pub straight_through: bool,
    /// Maximize the mean of `sign(R) ln(|R| + 1)` over the batch instead of the mean return.
    pub use_symlog: bool,
    pub optimizer: OptimizerConfig,
    /// Action bounds replacing those declared by the model.
    pub action_bounds: BTreeMap<String, Bounds>,
    pub init: PlanInit,
    /// Converge once no plan value changes by more than this in an epoch.
    pub convergence_tol: Option<f64>,
    /// Number of exact roll-outs averaged into the test return.
    pub test_batch_size: i64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            horizon: None,
            weight: 10.0,
            straight_through: false,
            use_symlog: false,
            optimizer: OptimizerConfig::default(),
            action_bounds: BTreeMap::new(),
            init: PlanInit::default(),
            convergence_tol: None,
            test_batch_size: 1,
        }
    }
}

/// Initial value of every step of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlanInit {
    /// The default value of each action fluent.
    Default,
    /// A constant, projected onto the action constraints.
    Constant(f64),
}

impl Default for PlanInit {
    fn default() -> Self {
        Self::Default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlannerStatus {
    /// No epoch has run since construction or the last re-plan.
    Uninitialized,
    Optimizing,
    /// The plan stopped changing.
    Converged,
    /// The epoch budget ran out or optimization was interrupted.
    Stopped,
}

/// Result of one optimization epoch.
#[derive(Debug)]
pub struct Progress {
    /// Number of epochs run since the last re-plan, including this one.
    pub iteration: usize,
    /// Mean relaxed return over the batch, before this epoch's update.
    pub train_return: f64,
    /// Mean exact return of the updated, discretized plan. Only on reporting epochs.
    pub test_return: Option<f64>,
    /// Whether the discretized plan satisfies every precondition. Only on reporting epochs.
    pub feasible: Option<bool>,
    /// Best test return of a feasible plan so far.
    pub best_return: Option<f64>,
    pub status: PlannerStatus,
    /// Plan values after the update. Shape `[horizon, shape...]` per action fluent.
    pub params: Fluents,
}

/// Error while planning.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Torch(#[from] TchError),
    #[error(transparent)]
    Optimizer(#[from] OptimizerStepError),
    #[error("invalid planner configuration: {0}")]
    InvalidConfig(String),
    #[error("logging failed: {0}")]
    Log(String),
}

/// `sign(x) ln(|x| + 1)`
pub fn symlog(x: &Tensor) -> Tensor {
    x.sign() * (x.abs() + 1.0).log()
}

/// Plans one action value per step by gradient ascent on the relaxed return.
pub struct Planner {
    config: PlannerConfig,
    relaxed: Evaluator<ProductLogic>,
    exact: Evaluator,
    /// Batched values of every state fluent.
    initial_state: Fluents,
    horizon: usize,
    bounds: BTreeMap<String, Bounds>,
    /// Owns `params`.
    #[allow(dead_code)]
    vs: VarStore,
    params: Fluents,
    optimizer: COptimizer,
    status: PlannerStatus,
    iteration: usize,
    best: Option<(f64, Fluents)>,
}

impl fmt::Debug for Planner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Planner")
            .field("config", &self.config)
            .field("horizon", &self.horizon)
            .field("status", &self.status)
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl Planner {
    /// Create a planner starting from the initial state of the model.
    ///
    /// # Errors
    /// If the model cannot be relaxed or the configuration is invalid.
    pub fn new(model: Arc<CompiledModel>, config: PlannerConfig) -> Result<Self, PlanError> {
        let logic = ProductLogic::new(config.weight).straight_through(config.straight_through);
        let relaxed = Evaluator::new(Arc::clone(&model), logic)?;
        let exact = Evaluator::exact(Arc::clone(&model));
        if config.test_batch_size < 1 {
            return Err(PlanError::InvalidConfig(format!(
                "test batch size {} is not positive",
                config.test_batch_size
            )));
        }

        for name in config.action_bounds.keys() {
            match model.fluent(name) {
                Some(info) if info.kind == FluentKind::Action => {}
                _ => return Err(EvalError::UnknownFluent { name: name.clone() }.into()),
            }
        }
        let bounds = model
            .fluents_of(FluentKind::Action)
            .map(|info| {
                let declared = || {
                    config
                        .action_bounds
                        .get(&info.name)
                        .or_else(|| model.model().action_bounds.get(&info.name))
                        .copied()
                        .unwrap_or((None, None))
                };
                let bounds = match &info.range {
                    ValueRange::Bool => (Some(0.0), Some(1.0)),
                    ValueRange::Object(type_name) => {
                        let last = model.type_size(type_name).map_or(0.0, |n| (n - 1) as f64);
                        let (lower, upper) = declared();
                        (
                            Some(lower.map_or(0.0, |l| l.max(0.0))),
                            Some(upper.map_or(last, |u| u.min(last))),
                        )
                    }
                    _ => declared(),
                };
                (info.name.clone(), bounds)
            })
            .collect();

        let horizon = config.horizon.unwrap_or(model.model().horizon);
        let initial_state = exact.full_state(&Fluents::new())?;
        let plan = initial_plan(&model, config.init, horizon)?;
        let (vs, params) = variables(&plan);
        let optimizer = config.optimizer.build_optimizer(&vs)?;
        let planner = Self {
            config,
            relaxed,
            exact,
            initial_state,
            horizon,
            bounds,
            vs,
            params,
            optimizer,
            status: PlannerStatus::Uninitialized,
            iteration: 0,
            best: None,
        };
        planner.project();
        Ok(planner)
    }

    pub const fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<CompiledModel> {
        self.exact.model()
    }

    pub const fn status(&self) -> PlannerStatus {
        self.status
    }

    pub const fn horizon(&self) -> usize {
        self.horizon
    }

    pub const fn iteration(&self) -> usize {
        self.iteration
    }

    /// Current relaxed plan values. Shape `[horizon, shape...]` per action fluent.
    pub const fn params(&self) -> &Fluents {
        &self.params
    }

    /// The discretized plan with the best feasible test return so far and that return.
    pub fn best_plan(&self) -> Option<(f64, &Fluents)> {
        self.best.as_ref().map(|(value, plan)| (*value, plan))
    }

    /// Optimize the plan for up to `epochs` epochs.
    ///
    /// Each epoch averages `batch_size` relaxed roll-outs with independent noise drawn from a
    /// generator seeded by `noise_seed`. The test return is measured every `report_every`
    /// epochs and on the last one. Dropping the iterator stops optimization between epochs.
    ///
    /// # Errors
    /// If `batch_size` or `report_every` is zero.
    pub fn optimize(
        &mut self,
        noise_seed: u64,
        epochs: usize,
        batch_size: i64,
        report_every: usize,
    ) -> Result<Optimization<'_>, PlanError> {
        if batch_size < 1 {
            return Err(PlanError::InvalidConfig(format!(
                "batch size {} is not positive",
                batch_size
            )));
        }
        if report_every == 0 {
            return Err(PlanError::InvalidConfig("report period is zero".into()));
        }
        Ok(Optimization {
            planner: self,
            rng: Prng::seed_from_u64(noise_seed),
            epoch: 0,
            epochs,
            batch_size,
            report_every,
            finished: false,
        })
    }

    /// Optimize and log the progress of every epoch, returning the last.
    pub fn run(
        &mut self,
        noise_seed: u64,
        epochs: usize,
        batch_size: i64,
        report_every: usize,
        logger: &mut dyn Logger,
    ) -> Result<Option<Progress>, PlanError> {
        let mut last = None;
        for progress in self.optimize(noise_seed, epochs, batch_size, report_every)? {
            let progress = progress?;
            log_progress(logger, &progress)?;
            last = Some(progress);
        }
        Ok(last)
    }

    /// The discretized action at `step` of the current plan, or of `params` if given.
    ///
    /// Boolean actions are set if their value exceeds ½, keeping only the largest ones when
    /// the model limits the number of non-default actions. Integer and object actions are
    /// rounded to the nearest value within their bounds.
    pub fn get_action(&self, params: Option<&Fluents>, step: usize) -> Result<Fluents, PlanError> {
        if step >= self.horizon {
            return Err(EvalError::PlanExhausted { step }.into());
        }
        let params = params.unwrap_or(&self.params);
        for (name, value) in params {
            let info = match self.model().fluent(name) {
                Some(info) if self.bounds.contains_key(name) => info,
                _ => return Err(EvalError::UnknownFluent { name: name.clone() }.into()),
            };
            let expected = info.batched_shape(self.horizon as i64);
            if value.size() != expected {
                return Err(EvalError::ShapeMismatch {
                    fluent: name.clone(),
                    expected,
                    actual: value.size(),
                }
                .into());
            }
        }
        Ok(tch::no_grad(|| at_step(&self.discretize(params), step)))
    }

    /// Restart planning from a new state with a new horizon.
    ///
    /// The new plan starts from the current one advanced by `shift` steps. Steps beyond the
    /// end of the current plan take their initial values. Optimizer state is reset.
    pub fn replan(
        &mut self,
        initial_state: &Fluents,
        horizon: usize,
        shift: usize,
    ) -> Result<(), PlanError> {
        let model = Arc::clone(self.exact.model());
        let initial_state = self.exact.full_state(initial_state)?;
        let fresh = initial_plan(&model, self.config.init, horizon)?;
        let mut plan = Fluents::new();
        for (name, init) in fresh {
            let old = self.params[&name].detach();
            let kept = (old.size()[0] - shift as i64).clamp(0, horizon as i64);
            let value = if kept == 0 {
                init
            } else {
                Tensor::cat(
                    &[
                        old.narrow(0, shift as i64, kept),
                        init.narrow(0, kept, horizon as i64 - kept),
                    ],
                    0,
                )
            };
            plan.insert(name, value);
        }
        let (vs, params) = variables(&plan);
        self.optimizer = self.config.optimizer.build_optimizer(&vs)?;
        self.vs = vs;
        self.params = params;
        self.initial_state = initial_state;
        self.horizon = horizon;
        self.status = PlannerStatus::Uninitialized;
        self.iteration = 0;
        self.best = None;
        self.project();
        Ok(())
    }

    fn epoch(
        &mut self,
        rng: &mut Prng,
        batch_size: i64,
        report: bool,
        last: bool,
    ) -> Result<Progress, PlanError> {
        self.status = PlannerStatus::Optimizing;
        let state = batched(&self.initial_state, batch_size);
        let returns = {
            let params = &self.params;
            let mut policy = FnPolicy(|step: usize, _: &Fluents| {
                Ok::<_, EvalError>(at_step(params, step))
            });
            rollout(&self.relaxed, &state, &mut policy, self.horizon, rng)?.returns
        };
        let objective = if self.config.use_symlog {
            symlog(&returns).mean(Kind::Double)
        } else {
            returns.mean(Kind::Double)
        };
        let before: Vec<Tensor> = self.params.values().map(|p| p.detach().copy()).collect();
        self.optimizer.backward_step_once(&-objective)?;
        self.project();
        self.iteration += 1;

        let change = self
            .params
            .values()
            .zip(&before)
            .map(|(p, b)| f64::from((p - b).abs().max()))
            .fold(0.0, f64::max);
        if matches!(self.config.convergence_tol, Some(tol) if change < tol) {
            self.status = PlannerStatus::Converged;
        } else if last {
            self.status = PlannerStatus::Stopped;
        }

        let (test_return, feasible) = if report || self.status == PlannerStatus::Converged {
            let (value, feasible) = self.test(rng)?;
            (Some(value), Some(feasible))
        } else {
            (None, None)
        };
        Ok(Progress {
            iteration: self.iteration,
            train_return: f64::from(returns.detach().mean(Kind::Double)),
            test_return,
            feasible,
            best_return: self.best.as_ref().map(|(value, _)| *value),
            status: self.status,
            params: self
                .params
                .iter()
                .map(|(name, p)| (name.clone(), p.detach().copy()))
                .collect(),
        })
    }

    /// Exact mean return of the discretized plan and whether it satisfies the preconditions.
    ///
    /// Updates the best plan.
    fn test(&mut self, rng: &mut Prng) -> Result<(f64, bool), PlanError> {
        let plan = tch::no_grad(|| self.discretize(&self.params));
        let state = batched(&self.initial_state, self.config.test_batch_size);
        let mut feasible = true;
        let returns = {
            let exact = &self.exact;
            let plan = &plan;
            let feasible = &mut feasible;
            let mut policy = FnPolicy(|step: usize, state: &Fluents| {
                let actions = at_step(plan, step);
                match exact.check_preconditions(state, &actions) {
                    Ok(()) => {}
                    Err(EvalError::PreconditionViolated { .. }) => *feasible = false,
                    Err(e) => return Err(e),
                }
                Ok(actions)
            });
            rollout(exact, &state, &mut policy, self.horizon, rng)?.returns
        };
        let value = f64::from(returns.mean(Kind::Double));
        if feasible && self.best.as_ref().map_or(true, |(best, _)| value > *best) {
            self.best = Some((value, plan));
        }
        Ok((value, feasible))
    }

    /// Project the plan onto the action bounds and the non-default action limit.
    fn project(&self) {
        tch::no_grad(|| {
            for (name, var) in &self.params {
                let bounds = self.bounds.get(name).copied().unwrap_or((None, None));
                var.shallow_clone().copy_(&clip(var, bounds));
            }
            if let Some(k) = self.model().model().max_nondef_actions {
                let infos = self.bool_actions();
                if infos.is_empty() {
                    return;
                }
                let distances: Vec<Tensor> = infos
                    .iter()
                    .map(|info| self.distance(info, &self.params[&info.name]))
                    .collect();
                let projected = project_cardinality(&Tensor::cat(&distances, 1), k as f64);
                self.split(&infos, &projected, |info, distance| {
                    let var = &self.params[&info.name];
                    var.shallow_clone()
                        .copy_(&from_distance(info, distance).reshape(&var.size()));
                });
            }
        });
    }

    /// Discretized copy of a plan.
    fn discretize(&self, params: &Fluents) -> Fluents {
        let mut plan = Fluents::new();
        let mut distances = Vec::new();
        let mut infos = Vec::new();
        for (name, value) in params {
            let info = match self.model().fluent(name) {
                Some(info) => info,
                None => continue,
            };
            let bounds = self.bounds.get(name).copied().unwrap_or((None, None));
            let value = clip(&value.detach(), bounds);
            match info.range {
                ValueRange::Bool => {
                    distances.push(self.distance(info, &value));
                    infos.push(info);
                }
                ValueRange::Int | ValueRange::Object(_) => {
                    plan.insert(name.clone(), value.round());
                }
                _ => {
                    plan.insert(name.clone(), value);
                }
            }
        }
        if !infos.is_empty() {
            let k = self.model().model().max_nondef_actions;
            let selected = select_top(&Tensor::cat(&distances, 1), k);
            self.split(&infos, &selected, |info, distance| {
                let shape = &params[&info.name].size();
                plan.insert(info.name.clone(), from_distance(info, distance).reshape(shape));
            });
        }
        plan
    }

    fn bool_actions(&self) -> Vec<&FluentInfo> {
        self.model()
            .fluents_of(FluentKind::Action)
            .filter(|info| info.is_bool() && self.params.contains_key(&info.name))
            .collect()
    }

    /// Distance of a boolean plan value from the default of its fluent. Shape `[horizon, n]`.
    fn distance(&self, info: &FluentInfo, value: &Tensor) -> Tensor {
        let value = value.reshape(&[self.horizon as i64, -1]);
        if info.default > 0.5 {
            -value + 1.0
        } else {
            value
        }
    }

    /// Call `f` with the columns of `joined` belonging to each fluent.
    fn split<'a, F>(&self, infos: &[&'a FluentInfo], joined: &Tensor, mut f: F)
    where
        F: FnMut(&'a FluentInfo, &Tensor),
    {
        let mut offset = 0;
        for &info in infos {
            let size = info.size() as i64;
            f(info, &joined.narrow(1, offset, size));
            offset += size;
        }
    }
}

fn from_distance(info: &FluentInfo, distance: &Tensor) -> Tensor {
    if info.default > 0.5 {
        -distance + 1.0
    } else {
        distance.shallow_clone()
    }
}

/// Initial plan of every action fluent. Shape `[horizon, shape...]`.
fn initial_plan(
    model: &CompiledModel,
    init: PlanInit,
    horizon: usize,
) -> Result<Fluents, PlanError> {
    if horizon == 0 {
        return Err(PlanError::InvalidConfig("horizon is zero".into()));
    }
    model
        .fluents_of(FluentKind::Action)
        .map(|info| {
            let shape = info.batched_shape(horizon as i64);
            let value = match (init, model.initial_value(&info.name)) {
                (PlanInit::Constant(c), _) => Tensor::full(&shape, c, OPTIONS),
                (PlanInit::Default, Some(default)) => default.expand(&shape, false).copy(),
                (PlanInit::Default, None) => {
                    return Err(PlanError::Eval(EvalError::UnknownFluent {
                        name: info.name.clone(),
                    }))
                }
            };
            Ok((info.name.clone(), value))
        })
        .collect()
}

/// Trainable double-precision variables initialized to the given values.
fn variables(plan: &Fluents) -> (VarStore, Fluents) {
    let mut vs = VarStore::new(Device::Cpu);
    {
        let root = vs.root();
        for (name, value) in plan {
            let _ = root.zeros(name, &value.size());
        }
    }
    vs.double();
    let variables = vs.variables();
    tch::no_grad(|| {
        for (name, value) in plan {
            if let Some(var) = variables.get(name) {
                var.shallow_clone().copy_(value);
            }
        }
    });
    (vs, variables.into_iter().collect())
}

/// Values of a plan at one step.
fn at_step(plan: &Fluents, step: usize) -> Fluents {
    plan.iter()
        .map(|(name, value)| (name.clone(), value.get(step as i64)))
        .collect()
}

fn batched(state: &Fluents, batch_size: i64) -> Fluents {
    state
        .iter()
        .map(|(name, value)| (name.clone(), expand_batch(value, batch_size)))
        .collect()
}

fn log_progress(logger: &mut dyn Logger, progress: &Progress) -> Result<(), PlanError> {
    let event = Event::Epoch;
    let mut log = |name: &'static str, value: Loggable| {
        logger
            .log(event, name, value)
            .map_err(|e| PlanError::Log(e.to_string()))
    };
    log("train_return", progress.train_return.into())?;
    if let Some(value) = progress.test_return {
        log("test_return", value.into())?;
    }
    if let Some(value) = progress.best_return {
        log("best_return", value.into())?;
    }
    log("status", format!("{:?}", progress.status).into())?;
    logger.done(event);
    Ok(())
}

/// Running optimization. Yields the progress of each epoch.
#[derive(Debug)]
pub struct Optimization<'a> {
    planner: &'a mut Planner,
    rng: Prng,
    epoch: usize,
    epochs: usize,
    batch_size: i64,
    report_every: usize,
    finished: bool,
}

impl Iterator for Optimization<'_> {
    type Item = Result<Progress, PlanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.epoch >= self.epochs {
            return None;
        }
        self.epoch += 1;
        let last = self.epoch == self.epochs;
        let report = last || self.epoch % self.report_every == 0;
        let result = self
            .planner
            .epoch(&mut self.rng, self.batch_size, report, last);
        match &result {
            Ok(progress) => self.finished = progress.status != PlannerStatus::Optimizing,
            Err(_) => {
                self.planner.status = PlannerStatus::Stopped;
                self.finished = true;
            }
        }
        Some(result)
    }
}

impl Drop for Optimization<'_> {
    fn drop(&mut self) {
        if self.planner.status == PlannerStatus::Optimizing {
            self.planner.status = PlannerStatus::Stopped;
        }
    }
}
