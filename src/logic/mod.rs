//! Operator semantics: exact and differentiable relaxations.
//!
//! A [`Logic`] supplies one method per operator family. The default method bodies are the
//! product-form fuzzy surrogates parameterized by a sharpness [`Logic::weight`]; an
//! implementation overrides whichever operators it wants to change. [`ExactLogic`] overrides
//! all of them with the exact semantics.
//!
//! All values are `Double` tensors. Boolean values are encoded as `0.0` / `1.0` (exact) or as
//! a degree of truth in `[0, 1]` (relaxed).
mod exact;
mod fuzzy;

pub use exact::ExactLogic;
pub use fuzzy::{soft_argmax, ProductLogic};

use crate::model::{AggregateOp, Arg, BinaryOp, Expr, UnaryOp};
use std::fmt;
use tch::{Device, Kind, Tensor};

/// An operator family, used to query whether a logic can evaluate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Aggregate(AggregateOp),
    If,
    Switch,
    /// A fluent reference with an argument computed from another expression.
    NestedIndex,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unary(op) => write!(f, "{}", op),
            Self::Binary(op) => write!(f, "{}", op),
            Self::Aggregate(op) => write!(f, "{:?}", op),
            Self::If => write!(f, "If"),
            Self::Switch => write!(f, "Switch"),
            Self::NestedIndex => write!(f, "nested fluent index"),
        }
    }
}

impl Operator {
    /// The operator family of an expression node, if it has one.
    pub fn of(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Unary { op, .. } => Some(Self::Unary(*op)),
            Expr::Binary { op, .. } => Some(Self::Binary(*op)),
            Expr::Aggregate { op, .. } => Some(Self::Aggregate(*op)),
            Expr::If { .. } => Some(Self::If),
            Expr::Switch { .. } => Some(Self::Switch),
            Expr::Fluent { args, .. } if args.iter().any(|a| matches!(a, Arg::Nested(_))) => {
                Some(Self::NestedIndex)
            }
            Expr::Constant(_) | Expr::Fluent { .. } | Expr::Sample(_) => None,
        }
    }
}

/// `1 - x`
pub fn complement(x: &Tensor) -> Tensor {
    -x + 1.0
}

/// Positions `0..n` of the cases stacked along axis 0 of a tensor of rank `rank`.
fn case_positions(n: i64, rank: usize, device: Device) -> Tensor {
    let mut shape = vec![1; rank];
    shape[0] = n;
    Tensor::arange(n, (Kind::Double, device)).reshape(&shape)
}

/// The case nearest to `pred`, with `cases` stacked along axis 0.
pub fn select_case(pred: &Tensor, cases: &Tensor) -> Tensor {
    let n = cases.size()[0];
    let index = pred
        .round()
        .clamp(0.0, (n - 1) as f64)
        .to_kind(Kind::Int64)
        .unsqueeze(0);
    cases.gather(0, &index, false).squeeze_dim(0)
}

/// Cases weighted by `softmax(-weight |pred - i|)` over their positions `i`.
pub fn soft_switch(pred: &Tensor, cases: &Tensor, weight: f64) -> Tensor {
    let positions = case_positions(cases.size()[0], cases.dim(), cases.device());
    let proximity = -(pred.unsqueeze(0) - positions).abs();
    let weights = (proximity * weight).softmax(0, Kind::Double);
    (cases * weights).sum_dim_intlist(&[0], false, Kind::Double)
}

/// Operator semantics.
///
/// Implementors must provide [`Logic::weight`]; every other method has a product-form
/// relaxation as its default.
pub trait Logic: fmt::Debug {
    /// Sharpness of the relaxation. Larger is closer to exact.
    fn weight(&self) -> f64;

    /// Small positive constant guarding against underflow.
    fn eps(&self) -> f64 {
        1e-12
    }

    /// Whether this logic computes exact values and samples exactly.
    fn is_exact(&self) -> bool {
        false
    }

    /// Whether the operator family has a usable implementation.
    ///
    /// Checked once for every expression when an evaluator is constructed.
    fn supports(&self, op: Operator) -> bool {
        !matches!(
            op,
            Operator::Unary(UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Round)
                | Operator::NestedIndex
        )
    }

    fn and(&self, a: &Tensor, b: &Tensor) -> Tensor {
        a * b
    }

    fn not(&self, x: &Tensor) -> Tensor {
        complement(x)
    }

    fn or(&self, a: &Tensor, b: &Tensor) -> Tensor {
        self.not(&self.and(&self.not(a), &self.not(b)))
    }

    fn xor(&self, a: &Tensor, b: &Tensor) -> Tensor {
        self.and(&self.or(a, b), &self.not(&self.and(a, b)))
    }

    fn implies(&self, a: &Tensor, b: &Tensor) -> Tensor {
        self.or(&self.not(a), b)
    }

    fn equiv(&self, a: &Tensor, b: &Tensor) -> Tensor {
        self.and(&self.implies(a, b), &self.implies(b, a))
    }

    /// Conjunction over the given (non-batch) axes.
    fn forall(&self, x: &Tensor, dims: &[i64]) -> Tensor {
        let mut dims = dims.to_vec();
        dims.sort_unstable_by(|a, b| b.cmp(a));
        dims.into_iter()
            .fold(x.shallow_clone(), |acc, d| acc.prod_dim_int(d, false, Kind::Double))
    }

    fn exists(&self, x: &Tensor, dims: &[i64]) -> Tensor {
        self.not(&self.forall(&self.not(x), dims))
    }

    fn greater_equal(&self, a: &Tensor, b: &Tensor) -> Tensor {
        ((a - b) * self.weight()).sigmoid()
    }

    fn greater(&self, a: &Tensor, b: &Tensor) -> Tensor {
        ((a - b) * self.weight()).sigmoid()
    }

    fn less_equal(&self, a: &Tensor, b: &Tensor) -> Tensor {
        self.greater_equal(b, a)
    }

    fn less(&self, a: &Tensor, b: &Tensor) -> Tensor {
        self.greater(b, a)
    }

    /// Difference of sigmoids around `a - b = 0`, normalized to equal 1 at `a = b`.
    ///
    /// Not consistent with [`Logic::greater`] and [`Logic::less`]: the three relations need not
    /// sum to one.
    fn equal(&self, a: &Tensor, b: &Tensor) -> Tensor {
        let w = self.weight();
        let d = a - b;
        let bump = ((&d + 0.5) * w).sigmoid() - ((&d - 0.5) * w).sigmoid();
        let peak = (w / 4.0).tanh();
        bump / peak.max(self.eps())
    }

    fn not_equal(&self, a: &Tensor, b: &Tensor) -> Tensor {
        self.not(&self.equal(a, b))
    }

    fn signum(&self, x: &Tensor) -> Tensor {
        (x * self.weight()).tanh()
    }

    fn sqrt(&self, x: &Tensor) -> Tensor {
        (x + self.eps()).sqrt()
    }

    fn floor(&self, x: &Tensor) -> Tensor {
        x.floor()
    }

    fn ceil(&self, x: &Tensor) -> Tensor {
        x.ceil()
    }

    fn round(&self, x: &Tensor) -> Tensor {
        x.round()
    }

    /// Index of the maximum along `dim`, as a real number.
    fn argmax(&self, x: &Tensor, dim: i64) -> Tensor {
        soft_argmax(x, dim, self.weight())
    }

    fn argmin(&self, x: &Tensor, dim: i64) -> Tensor {
        self.argmax(&-x, dim)
    }

    /// Both branches are always evaluated by the caller.
    fn if_then_else(&self, cond: &Tensor, then: &Tensor, otherwise: &Tensor) -> Tensor {
        cond * then + complement(cond) * otherwise
    }

    /// Value of the case selected by `pred`.
    ///
    /// `cases` stacks the case values along axis 0. Its other axes match `pred`.
    fn switch(&self, pred: &Tensor, cases: &Tensor) -> Tensor {
        soft_switch(pred, cases, self.weight())
    }

    /// Relaxed Bernoulli sample.
    ///
    /// `gumbel` has shape `[..., 2]`: standard Gumbel noise for the outcomes `false`, `true`.
    fn bernoulli(&self, prob: &Tensor, gumbel: &Tensor) -> Tensor {
        let probs = Tensor::stack(&[complement(prob), prob.shallow_clone()], -1);
        self.discrete(&probs, gumbel)
    }

    /// Relaxed categorical sample (Gumbel-softmax) over the last axis of `probs`.
    fn discrete(&self, probs: &Tensor, gumbel: &Tensor) -> Tensor {
        let scores = gumbel + (probs + self.eps()).log();
        self.argmax(&scores, -1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Logic derived from the product logic with a minimum t-norm.
    #[derive(Debug)]
    struct GodelLogic;

    impl Logic for GodelLogic {
        fn weight(&self) -> f64 {
            10.0
        }

        fn and(&self, a: &Tensor, b: &Tensor) -> Tensor {
            a.minimum(b)
        }
    }

    fn scalar(x: f64) -> Tensor {
        Tensor::from(x).to_kind(Kind::Double)
    }

    #[rstest]
    #[case(0.2, 0.7)]
    #[case(1.0, 0.0)]
    #[case(0.5, 0.5)]
    fn or_follows_de_morgan(#[case] a: f64, #[case] b: f64) {
        let logic = ProductLogic::new(1.0);
        let or = logic.or(&scalar(a), &scalar(b)).double_value(&[]);
        assert!((or - (a + b - a * b)).abs() < 1e-12);
    }

    #[test]
    fn user_logic_overrides_and() {
        let logic = GodelLogic;
        let a = Tensor::of_slice(&[0.2, 0.9]);
        let b = Tensor::of_slice(&[0.6, 0.3]);
        assert_eq!(logic.and(&a, &b), Tensor::of_slice(&[0.2, 0.3]));
        // Derived operators pick up the override
        let or: Vec<f64> = logic.or(&a, &b).into();
        assert!((or[0] - 0.6).abs() < 1e-12);
        assert!((or[1] - 0.9).abs() < 1e-12);
        // Untouched operators keep the product-form default
        let gt = logic.greater(&scalar(1.0), &scalar(0.0)).double_value(&[]);
        assert!((gt - 1.0 / (1.0 + (-10.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn default_support_rejects_rounding_and_nesting() {
        let logic = ProductLogic::default();
        assert!(!logic.supports(Operator::Unary(UnaryOp::Floor)));
        assert!(!logic.supports(Operator::Unary(UnaryOp::Round)));
        assert!(!logic.supports(Operator::NestedIndex));
        assert!(logic.supports(Operator::Binary(BinaryOp::Eq)));
        assert!(ExactLogic.supports(Operator::NestedIndex));
    }
}
