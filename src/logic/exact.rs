use super::{complement, select_case, Logic, Operator};
use tch::{Kind, Tensor};

/// Exact operator semantics.
///
/// Boolean results are `0.0` or `1.0`. Gradients, where defined, are zero almost everywhere.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExactLogic;

fn indicator(x: Tensor) -> Tensor {
    x.to_kind(Kind::Double)
}

fn truth(x: &Tensor) -> Tensor {
    x.gt(0.5)
}

impl Logic for ExactLogic {
    fn weight(&self) -> f64 {
        f64::INFINITY
    }

    fn eps(&self) -> f64 {
        0.0
    }

    fn is_exact(&self) -> bool {
        true
    }

    fn supports(&self, _op: Operator) -> bool {
        true
    }

    fn and(&self, a: &Tensor, b: &Tensor) -> Tensor {
        indicator(truth(a).logical_and(&truth(b)))
    }

    fn not(&self, x: &Tensor) -> Tensor {
        indicator(truth(x).logical_not())
    }

    fn or(&self, a: &Tensor, b: &Tensor) -> Tensor {
        indicator(truth(a).logical_or(&truth(b)))
    }

    fn xor(&self, a: &Tensor, b: &Tensor) -> Tensor {
        indicator(truth(a).logical_xor(&truth(b)))
    }

    fn forall(&self, x: &Tensor, dims: &[i64]) -> Tensor {
        indicator(truth(x)).amin(dims, false)
    }

    fn exists(&self, x: &Tensor, dims: &[i64]) -> Tensor {
        indicator(truth(x)).amax(dims, false)
    }

    fn greater_equal(&self, a: &Tensor, b: &Tensor) -> Tensor {
        indicator(a.ge_tensor(b))
    }

    fn greater(&self, a: &Tensor, b: &Tensor) -> Tensor {
        indicator(a.gt_tensor(b))
    }

    fn equal(&self, a: &Tensor, b: &Tensor) -> Tensor {
        indicator(a.eq_tensor(b))
    }

    fn not_equal(&self, a: &Tensor, b: &Tensor) -> Tensor {
        indicator(a.ne_tensor(b))
    }

    fn signum(&self, x: &Tensor) -> Tensor {
        x.sign()
    }

    fn sqrt(&self, x: &Tensor) -> Tensor {
        x.sqrt()
    }

    /// First index of the maximum, zero-based.
    fn argmax(&self, x: &Tensor, dim: i64) -> Tensor {
        indicator(x.argmax(dim, false))
    }

    fn if_then_else(&self, cond: &Tensor, then: &Tensor, otherwise: &Tensor) -> Tensor {
        then.where_self(&truth(cond), otherwise)
    }

    fn switch(&self, pred: &Tensor, cases: &Tensor) -> Tensor {
        select_case(pred, cases)
    }

    /// Gumbel-max: an exact categorical sample given exact Gumbel noise.
    fn discrete(&self, probs: &Tensor, gumbel: &Tensor) -> Tensor {
        let scores = gumbel + probs.log();
        self.argmax(&scores, -1)
    }

    fn bernoulli(&self, prob: &Tensor, gumbel: &Tensor) -> Tensor {
        let probs = Tensor::stack(&[complement(prob), prob.shallow_clone()], -1);
        self.discrete(&probs, gumbel)
    }
}
