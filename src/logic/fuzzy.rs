use super::{select_case, soft_switch, Logic};
use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

/// Expected index under `softmax(weight * x)` along `dim`.
pub fn soft_argmax(x: &Tensor, dim: i64, weight: f64) -> Tensor {
    let probs = (x * weight).softmax(dim, Kind::Double);
    let n = x.size()[normalize_dim(dim, x.dim())];
    let mut index_shape = vec![1; x.dim()];
    index_shape[normalize_dim(dim, x.dim())] = n;
    let index = Tensor::arange(n, (Kind::Double, x.device())).reshape(&index_shape);
    (probs * index).sum_dim_intlist(&[dim], false, Kind::Double)
}

fn normalize_dim(dim: i64, ndim: usize) -> usize {
    if dim < 0 {
        (ndim as i64 + dim) as usize
    } else {
        dim as usize
    }
}

/// Product t-norm fuzzy logic with sigmoid comparisons.
///
/// All operators use the default relaxations of [`Logic`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductLogic {
    /// Sharpness of comparisons, sign, argmax and sampling.
    pub weight: f64,
    /// Added inside logarithms and square roots.
    pub eps: f64,
    /// Use the hard argmax in the forward pass and the soft gradient in the backward pass.
    pub straight_through: bool,
}

impl Default for ProductLogic {
    fn default() -> Self {
        Self {
            weight: 10.0,
            eps: 1e-12,
            straight_through: false,
        }
    }
}

impl ProductLogic {
    pub fn new(weight: f64) -> Self {
        Self {
            weight,
            ..Self::default()
        }
    }

    pub const fn straight_through(mut self, straight_through: bool) -> Self {
        self.straight_through = straight_through;
        self
    }
}

impl Logic for ProductLogic {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn eps(&self) -> f64 {
        self.eps
    }

    fn argmax(&self, x: &Tensor, dim: i64) -> Tensor {
        let soft = soft_argmax(x, dim, self.weight);
        if self.straight_through {
            let hard = x.argmax(dim, false).to_kind(Kind::Double);
            &soft + (hard - &soft).detach()
        } else {
            soft
        }
    }

    fn switch(&self, pred: &Tensor, cases: &Tensor) -> Tensor {
        let soft = soft_switch(pred, cases, self.weight);
        if self.straight_through {
            &soft + (select_case(pred, cases) - &soft).detach()
        } else {
            soft
        }
    }
}
