//! Vectorized evaluation of expression trees.
//!
//! Within a scope of `k` bound variables every non-constant value has rank `k + 1`: the batch
//! axis followed by one axis per variable, innermost last. An axis has either the full size
//! of its variable's type or size 1 (broadcast). Constants have rank 0.
use super::EvalError;
use crate::compiler::CompiledModel;
use crate::logic::Logic;
use crate::model::{AggregateOp, Arg, BinaryOp, Distribution, Expr, Literal, UnaryOp};
use crate::reparam::{draw_noise, reparameterization, sample_exact, transform};
use crate::utils::tensor::first_index;
use crate::{Fluents, Prng};
use tch::{Device, Kind, Tensor};

/// Fill value of filtered-out elements in extremum aggregations.
const SENTINEL: f64 = 1e300;

/// Bound variables with the sizes of their types, innermost last.
pub(super) type Scope = Vec<(String, i64)>;

/// Prepend unit axes up to the given rank.
pub(super) fn to_rank(tensor: &Tensor, rank: usize) -> Tensor {
    let dim = tensor.dim();
    if dim >= rank {
        return tensor.shallow_clone();
    }
    let mut shape = vec![1; rank - dim];
    shape.extend(tensor.size());
    tensor.reshape(&shape)
}

/// Reshape a mask of rank `outer` to `rank` by appending unit axes.
fn append_axes(mask: &Tensor, outer: usize, rank: usize) -> Tensor {
    let mut shape = to_rank(mask, outer).size();
    shape.resize(rank, 1);
    mask.reshape(&shape)
}

fn restrict(live: Option<&Tensor>, mask: &Tensor) -> Tensor {
    match live {
        Some(live) => live.logical_and(mask),
        None => mask.shallow_clone(),
    }
}

/// Evaluation state of one step.
pub(super) struct Context<'a, L: ?Sized> {
    pub model: &'a CompiledModel,
    pub logic: &'a L,
    /// Values of all fluents readable so far.
    pub values: Fluents,
    pub batch: i64,
    pub rng: &'a mut Prng,
    /// Description of the expression being evaluated, for error messages.
    pub context: String,
}

impl<'a, L: Logic + ?Sized> Context<'a, L> {
    /// Value of the update function of `fluent` with shape `[batch, shape...]`.
    pub fn cpf(&mut self, fluent: &str) -> Result<Tensor, EvalError> {
        let model = self.model;
        let unknown = || EvalError::UnknownFluent {
            name: fluent.into(),
        };
        let info = model.fluent(fluent).ok_or_else(unknown)?;
        let cpf = model.cpf(fluent).ok_or_else(unknown)?;
        self.context = format!("cpf {}", fluent);
        let mut scope: Scope = cpf
            .params
            .iter()
            .cloned()
            .zip(info.shape.iter().copied())
            .collect();
        let value = self.eval(&cpf.expr, &mut scope, None)?;
        Ok(to_rank(&value, scope.len() + 1).expand(&info.batched_shape(self.batch), false))
    }

    /// Value of a closed expression with shape `[batch]`.
    pub fn root(&mut self, expr: &Expr, context: &str) -> Result<Tensor, EvalError> {
        self.context = context.into();
        let value = self.eval(expr, &mut Vec::new(), None)?;
        Ok(to_rank(&value, 1).expand(&[self.batch], false))
    }

    /// Evaluate an expression in a scope.
    ///
    /// `live` marks the elements whose value is used. Exact domain checks ignore the rest.
    fn eval(
        &mut self,
        expr: &Expr,
        scope: &mut Scope,
        live: Option<&Tensor>,
    ) -> Result<Tensor, EvalError> {
        match expr {
            Expr::Constant(literal) => Ok(Tensor::from(self.literal(literal)?)),
            Expr::Fluent { name, args } => self.reference(name, args, scope, live),
            Expr::Unary { op, arg } => {
                let x = self.eval(arg, scope, live)?;
                self.unary(*op, &x, live)
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs, scope, live)?;
                let b = self.eval(rhs, scope, live)?;
                self.binary(*op, &a, &b, live)
            }
            Expr::Aggregate {
                op,
                vars,
                filter,
                body,
            } => {
                let outer = scope.len();
                let mut sizes = Vec::with_capacity(vars.len());
                for (var, type_name) in vars {
                    let size = self
                        .model
                        .type_size(type_name)
                        .ok_or_else(|| EvalError::UndefinedType {
                            name: type_name.clone(),
                        })?;
                    scope.push((var.clone(), size));
                    sizes.push(size);
                }
                let result = self.aggregate(*op, &sizes, filter.as_deref(), body, scope, live);
                scope.truncate(outer);
                result
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.eval(cond, scope, live)?;
                let (live_then, live_otherwise) = if self.logic.is_exact() {
                    let taken = cond.gt(0.5);
                    (
                        Some(restrict(live, &taken)),
                        Some(restrict(live, &taken.logical_not())),
                    )
                } else {
                    (None, None)
                };
                let then = self.eval(then, scope, live_then.as_ref())?;
                let otherwise = self.eval(otherwise, scope, live_otherwise.as_ref())?;
                Ok(self.logic.if_then_else(&cond, &then, &otherwise))
            }
            Expr::Switch { pred, cases } => self.switch(pred, cases, scope, live),
            Expr::Sample(dist) => self.sample(dist, scope, live),
        }
    }

    /// Exact evaluation only checks and evaluates each case where it is selected.
    fn switch(
        &mut self,
        pred: &Expr,
        cases: &[Expr],
        scope: &mut Scope,
        live: Option<&Tensor>,
    ) -> Result<Tensor, EvalError> {
        let pred = self.eval(pred, scope, live)?;
        let exact = self.logic.is_exact();
        let selected = pred.round();
        if exact {
            let missing = selected.lt(0.0).logical_or(&selected.ge(cases.len() as f64));
            self.check_domain(&missing, live, "switch", "no case for selector")?;
        }
        let rank = scope.len() + 1;
        let mut values = vec![to_rank(&pred, rank)];
        for (i, case) in cases.iter().enumerate() {
            let case_live = if exact {
                Some(restrict(live, &selected.eq(i as f64)))
            } else {
                None
            };
            values.push(to_rank(&self.eval(case, scope, case_live.as_ref())?, rank));
        }
        let values = Tensor::broadcast_tensors(&values);
        let stacked = Tensor::stack(&values[1..], 0);
        Ok(self.logic.switch(&values[0], &stacked))
    }

    fn literal(&self, literal: &Literal) -> Result<f64, EvalError> {
        match literal {
            Literal::Bool(b) => Ok(f64::from(u8::from(*b))),
            Literal::Int(i) => Ok(*i as f64),
            Literal::Real(x) => Ok(*x),
            Literal::Object(name) => self.object_index(name).map(|i| i as f64),
        }
    }

    fn object_index(&self, name: &str) -> Result<i64, EvalError> {
        self.model
            .object(name)
            .map(|(_, index)| index)
            .ok_or_else(|| EvalError::UndefinedObject { name: name.into() })
    }

    /// Report a domain violation at the first live element of `violated`.
    ///
    /// Only the exact logic checks domains.
    fn check_domain(
        &self,
        violated: &Tensor,
        live: Option<&Tensor>,
        op: &str,
        detail: &str,
    ) -> Result<(), EvalError> {
        if !self.logic.is_exact() {
            return Ok(());
        }
        match first_index(&restrict(live, violated)) {
            None => Ok(()),
            Some(index) => Err(EvalError::DomainViolation {
                op: op.into(),
                detail: format!("{} at {:?}", detail, index),
                context: self.context.clone(),
            }),
        }
    }

    /// Gather the referenced elements of a fluent by linear index.
    fn reference(
        &mut self,
        name: &str,
        args: &[Arg],
        scope: &mut Scope,
        live: Option<&Tensor>,
    ) -> Result<Tensor, EvalError> {
        let model = self.model;
        let info = model.fluent(name).ok_or_else(|| EvalError::UnknownFluent {
            name: name.into(),
        })?;
        let value = self
            .values
            .get(name)
            .ok_or_else(|| EvalError::UnknownFluent { name: name.into() })?
            .shallow_clone();

        let rank = scope.len() + 1;
        let options = (Kind::Int64, Device::Cpu);
        let mut index = Tensor::zeros(&vec![1; rank], options);
        let mut stride = 1;
        for (arg, &size) in args.iter().zip(&info.shape).rev() {
            let arg_index = match arg {
                Arg::Var(var) => {
                    let axis = scope.iter().rposition(|(v, _)| v == var).ok_or_else(|| {
                        EvalError::UnboundVariable {
                            var: var.clone(),
                            context: self.context.clone(),
                        }
                    })?;
                    let mut shape = vec![1; rank];
                    shape[axis + 1] = scope[axis].1;
                    Tensor::arange(scope[axis].1, options).reshape(&shape)
                }
                Arg::Object(object) => Tensor::from(self.object_index(object)?),
                Arg::Nested(inner) => {
                    let raw = self.eval(inner, scope, live)?;
                    let nested = raw.round().to_kind(Kind::Int64);
                    let invalid = restrict(live, &nested.lt(0).logical_or(&nested.ge(size)));
                    if let Some(at) = first_index(&invalid) {
                        return Err(EvalError::IndexOutOfRange {
                            fluent: name.into(),
                            index: nested.expand(&invalid.size(), false).int64_value(&at),
                            size,
                            context: self.context.clone(),
                        });
                    }
                    // Elements outside `live` are unused but must still be gathered
                    to_rank(&nested.clamp(0, size - 1), rank)
                }
            };
            index = index + arg_index * stride;
            stride *= size;
        }
        let batch = value.size()[0];
        if batch > 1 {
            let mut shape = vec![1; rank];
            shape[0] = batch;
            index = index + Tensor::arange(batch, options).reshape(&shape) * stride;
        }
        Ok(value.reshape(&[-1]).take(&index))
    }

    fn unary(&self, op: UnaryOp, x: &Tensor, live: Option<&Tensor>) -> Result<Tensor, EvalError> {
        use UnaryOp::*;
        let logic = self.logic;
        Ok(match op {
            Neg => -x,
            Not => logic.not(x),
            Abs => x.abs(),
            Sgn => logic.signum(x),
            Exp => x.exp(),
            Ln => {
                self.check_domain(&x.le(0.0), live, "ln", "non-positive argument")?;
                x.log()
            }
            Sqrt => {
                self.check_domain(&x.lt(0.0), live, "sqrt", "negative argument")?;
                logic.sqrt(x)
            }
            Sin => x.sin(),
            Cos => x.cos(),
            Tan => x.tan(),
            Tanh => x.tanh(),
            Floor => logic.floor(x),
            Ceil => logic.ceil(x),
            Round => logic.round(x),
        })
    }

    fn binary(
        &self,
        op: BinaryOp,
        a: &Tensor,
        b: &Tensor,
        live: Option<&Tensor>,
    ) -> Result<Tensor, EvalError> {
        use BinaryOp::*;
        let logic = self.logic;
        Ok(match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => {
                self.check_domain(&b.eq(0.0), live, "/", "division by zero")?;
                a / b
            }
            Pow => {
                let invalid = a.lt(0.0).logical_and(&b.frac().ne(0.0));
                self.check_domain(&invalid, live, "pow", "negative base with fractional exponent")?;
                a.pow(b)
            }
            Min => a.minimum(b),
            Max => a.maximum(b),
            And => logic.and(a, b),
            Or => logic.or(a, b),
            Xor => logic.xor(a, b),
            Implies => logic.implies(a, b),
            Equiv => logic.equiv(a, b),
            Eq => logic.equal(a, b),
            Ne => logic.not_equal(a, b),
            Lt => logic.less(a, b),
            Le => logic.less_equal(a, b),
            Gt => logic.greater(a, b),
            Ge => logic.greater_equal(a, b),
        })
    }

    /// Reduce `body` over the innermost `sizes.len()` variables of `scope`.
    fn aggregate(
        &mut self,
        op: AggregateOp,
        sizes: &[i64],
        filter: Option<&Expr>,
        body: &Expr,
        scope: &mut Scope,
        live: Option<&Tensor>,
    ) -> Result<Tensor, EvalError> {
        use AggregateOp::*;
        let exact = self.logic.is_exact();
        let rank = scope.len() + 1;
        let outer = rank - sizes.len();
        let axes: Vec<i64> = (outer..rank).map(|a| a as i64).collect();
        let expand = |t: &Tensor| {
            let t = to_rank(t, rank);
            let mut shape = t.size();
            for (&axis, &size) in axes.iter().zip(sizes) {
                shape[axis as usize] = size;
            }
            t.expand(&shape, false)
        };

        let outer_live = live.map(|l| append_axes(l, outer, rank));
        let filter = match filter {
            Some(f) => Some(self.eval(f, scope, outer_live.as_ref())?),
            None => None,
        };
        let body_live = match (&filter, exact) {
            (Some(f), true) => Some(restrict(outer_live.as_ref(), &f.gt(0.5))),
            _ => outer_live,
        };
        let mut body = self.eval(body, scope, body_live.as_ref())?;

        if let Some(f) = &filter {
            let logic = self.logic;
            let fill =
                |body: &Tensor, value: f64| logic.if_then_else(f, body, &Tensor::from(value));
            body = match op {
                Sum | Avg => fill(&body, 0.0),
                Prod => fill(&body, 1.0),
                Min | Argmin => fill(&body, SENTINEL),
                Max | Argmax => fill(&body, -SENTINEL),
                Forall => logic.implies(f, &body),
                Exists => logic.and(f, &body),
            };
        }
        let body = expand(&body);

        Ok(match op {
            Sum => body.sum_dim_intlist(&axes, false, Kind::Double),
            Avg => {
                let total = body.sum_dim_intlist(&axes, false, Kind::Double);
                let count = match &filter {
                    None => Tensor::from(sizes.iter().product::<i64>() as f64),
                    Some(f) => {
                        let weight = if exact {
                            f.gt(0.5).to_kind(Kind::Double)
                        } else {
                            f.shallow_clone()
                        };
                        expand(&weight).sum_dim_intlist(&axes, false, Kind::Double)
                    }
                };
                self.check_domain(&count.eq(0.0), live, "avg", "empty set")?;
                total / count
            }
            Prod => axes.iter().rev().fold(body, |acc, &axis| {
                acc.prod_dim_int(axis, false, Kind::Double)
            }),
            Min => body.amin(&axes, false),
            Max => body.amax(&axes, false),
            Forall => self.logic.forall(&body, &axes),
            Exists => self.logic.exists(&body, &axes),
            Argmax => self.logic.argmax(&body, axes[0]),
            Argmin => self.logic.argmin(&body, axes[0]),
        })
    }

    fn sample(
        &mut self,
        dist: &Distribution,
        scope: &mut Scope,
        live: Option<&Tensor>,
    ) -> Result<Tensor, EvalError> {
        let params = dist
            .params()
            .into_iter()
            .map(|p| self.eval(p, scope, live))
            .collect::<Result<Vec<_>, _>>()?;
        let mut shape = vec![self.batch];
        shape.extend(scope.iter().map(|(_, size)| *size));
        if self.logic.is_exact() {
            let (value, invalid) = sample_exact(dist, &params, &shape, self.rng);
            self.check_domain(&invalid, live, dist.name(), "invalid parameters")?;
            Ok(value)
        } else {
            let noise =
                reparameterization(dist).and_then(|base| draw_noise(base, &shape, self.rng));
            Ok(transform(self.logic, dist, &params, &shape, noise.as_ref()))
        }
    }
}
