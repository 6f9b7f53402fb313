//! Expression trees for conditional update functions and rewards.
use super::Literal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops;

/// An expression over fluents of the current time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal constant.
    Constant(Literal),
    /// A reference to a (possibly parameterized) fluent.
    Fluent { name: String, args: Vec<Arg> },
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Reduction of `body` over the objects of one or more types.
    ///
    /// `filter`, if present, is a boolean expression over the same variables selecting the
    /// objects that take part in the reduction.
    Aggregate {
        op: AggregateOp,
        vars: Vec<(String, String)>,
        filter: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// The case whose position equals the value of `pred`, an integer or object index.
    Switch { pred: Box<Expr>, cases: Vec<Expr> },
    /// A sample from a distribution.
    Sample(Distribution),
}

/// A fluent reference argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    /// A variable bound by the enclosing update function or aggregation.
    Var(String),
    /// A constant object of the parameter type.
    Object(String),
    /// An object index computed from another expression.
    Nested(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Sgn,
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Tanh,
    Floor,
    Ceil,
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    And,
    Or,
    Xor,
    Implies,
    Equiv,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOp {
    Sum,
    Prod,
    Avg,
    Min,
    Max,
    Forall,
    Exists,
    /// Index of the maximizing object. Takes exactly one variable.
    Argmax,
    /// Index of the minimizing object. Takes exactly one variable.
    Argmin,
}

/// Distributions that may appear in a sample expression.
///
/// Parameters follow the usual planning-language conventions: `Normal` takes a variance
/// and `Exponential` / `Gamma` / `Weibull` take a scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    KronDelta(Box<Expr>),
    DiracDelta(Box<Expr>),
    Bernoulli(Box<Expr>),
    Normal { mean: Box<Expr>, var: Box<Expr> },
    Uniform { low: Box<Expr>, high: Box<Expr> },
    Exponential { scale: Box<Expr> },
    Weibull { shape: Box<Expr>, scale: Box<Expr> },
    Gumbel { loc: Box<Expr>, scale: Box<Expr> },
    /// Categorical over outcome indices `0..probs.len()`.
    Discrete(Vec<Expr>),
    Poisson { rate: Box<Expr> },
    Gamma { shape: Box<Expr>, scale: Box<Expr> },
    Beta { alpha: Box<Expr>, beta: Box<Expr> },
    Binomial { trials: Box<Expr>, prob: Box<Expr> },
}

impl Distribution {
    /// Distribution family name.
    pub const fn name(&self) -> &'static str {
        use Distribution::*;
        match self {
            KronDelta(_) => "KronDelta",
            DiracDelta(_) => "DiracDelta",
            Bernoulli(_) => "Bernoulli",
            Normal { .. } => "Normal",
            Uniform { .. } => "Uniform",
            Exponential { .. } => "Exponential",
            Weibull { .. } => "Weibull",
            Gumbel { .. } => "Gumbel",
            Discrete(_) => "Discrete",
            Poisson { .. } => "Poisson",
            Gamma { .. } => "Gamma",
            Beta { .. } => "Beta",
            Binomial { .. } => "Binomial",
        }
    }

    /// Parameter expressions in declaration order.
    pub fn params(&self) -> Vec<&Expr> {
        use Distribution::*;
        match self {
            KronDelta(x) | DiracDelta(x) | Bernoulli(x) => vec![x],
            Normal { mean, var } => vec![mean, var],
            Uniform { low, high } => vec![low, high],
            Exponential { scale } => vec![scale],
            Weibull { shape, scale } | Gamma { shape, scale } => vec![shape, scale],
            Gumbel { loc, scale } => vec![loc, scale],
            Discrete(probs) => probs.iter().collect(),
            Poisson { rate } => vec![rate],
            Beta { alpha, beta } => vec![alpha, beta],
            Binomial { trials, prob } => vec![trials, prob],
        }
    }
}

impl Expr {
    pub fn real(value: f64) -> Self {
        Self::Constant(Literal::Real(value))
    }

    pub fn int(value: i64) -> Self {
        Self::Constant(Literal::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::Constant(Literal::Bool(value))
    }

    /// Object literal; evaluates to the object's index within its type.
    pub fn object<S: Into<String>>(name: S) -> Self {
        Self::Constant(Literal::Object(name.into()))
    }

    /// Reference a fluent. Arguments starting with `?` are variables, all others are objects.
    pub fn fluent<I, S>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args
            .into_iter()
            .map(|a| {
                let a = a.as_ref();
                if a.starts_with('?') {
                    Arg::Var(a.into())
                } else {
                    Arg::Object(a.into())
                }
            })
            .collect();
        Self::Fluent {
            name: name.into(),
            args,
        }
    }

    /// Reference a fluent without parameters.
    pub fn scalar(name: &str) -> Self {
        Self::Fluent {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn unary(op: UnaryOp, arg: Self) -> Self {
        Self::Unary {
            op,
            arg: Box::new(arg),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(self, other: Self) -> Self {
        Self::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Self) -> Self {
        Self::binary(BinaryOp::Or, self, other)
    }

    pub fn equals(self, other: Self) -> Self {
        Self::binary(BinaryOp::Eq, self, other)
    }

    pub fn gt(self, other: Self) -> Self {
        Self::binary(BinaryOp::Gt, self, other)
    }

    pub fn ge(self, other: Self) -> Self {
        Self::binary(BinaryOp::Ge, self, other)
    }

    pub fn lt(self, other: Self) -> Self {
        Self::binary(BinaryOp::Lt, self, other)
    }

    pub fn le(self, other: Self) -> Self {
        Self::binary(BinaryOp::Le, self, other)
    }

    pub fn abs(self) -> Self {
        Self::unary(UnaryOp::Abs, self)
    }

    pub fn if_then_else(cond: Self, then: Self, otherwise: Self) -> Self {
        Self::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn switch<I: IntoIterator<Item = Self>>(pred: Self, cases: I) -> Self {
        Self::Switch {
            pred: Box::new(pred),
            cases: cases.into_iter().collect(),
        }
    }

    /// Aggregate `body` over variables given as `(var, type)` pairs.
    pub fn aggregate(op: AggregateOp, vars: &[(&str, &str)], body: Self) -> Self {
        Self::Aggregate {
            op,
            vars: vars
                .iter()
                .map(|(v, t)| ((*v).to_owned(), (*t).to_owned()))
                .collect(),
            filter: None,
            body: Box::new(body),
        }
    }

    pub fn sum(vars: &[(&str, &str)], body: Self) -> Self {
        Self::aggregate(AggregateOp::Sum, vars, body)
    }

    /// Restrict an aggregation to the objects satisfying `filter`.
    ///
    /// Has no effect on other expressions.
    #[must_use]
    pub fn filtered(self, filter: Self) -> Self {
        match self {
            Self::Aggregate { op, vars, body, .. } => Self::Aggregate {
                op,
                vars,
                filter: Some(Box::new(filter)),
                body,
            },
            other => other,
        }
    }

    pub fn sample(dist: Distribution) -> Self {
        Self::Sample(dist)
    }

    pub fn normal(mean: Self, var: Self) -> Self {
        Self::Sample(Distribution::Normal {
            mean: Box::new(mean),
            var: Box::new(var),
        })
    }

    pub fn bernoulli(p: Self) -> Self {
        Self::Sample(Distribution::Bernoulli(Box::new(p)))
    }

    /// Immediate sub-expressions.
    pub fn children(&self) -> Vec<&Self> {
        match self {
            Self::Constant(_) => Vec::new(),
            Self::Fluent { args, .. } => args
                .iter()
                .filter_map(|a| match a {
                    Arg::Nested(e) => Some(e.as_ref()),
                    _ => None,
                })
                .collect(),
            Self::Unary { arg, .. } => vec![arg],
            Self::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Aggregate { filter, body, .. } => {
                let mut c: Vec<&Self> = filter.iter().map(AsRef::as_ref).collect();
                c.push(body);
                c
            }
            Self::If {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            Self::Switch { pred, cases } => {
                let mut c = vec![pred.as_ref()];
                c.extend(cases);
                c
            }
            Self::Sample(dist) => dist.params(),
        }
    }

    /// Visit this expression and all sub-expressions in pre-order.
    pub fn visit<'a, F: FnMut(&'a Self)>(&'a self, f: &mut F) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Names of all fluents referenced by this expression (with repetition).
    pub fn fluent_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.visit(&mut |e| {
            if let Self::Fluent { name, .. } = e {
                refs.push(name.as_str());
            }
        });
        refs
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Self;
            fn $method(self, rhs: Self) -> Self {
                Self::binary($op, self, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

impl ops::Neg for Expr {
    type Output = Self;
    fn neg(self) -> Self {
        Self::unary(UnaryOp::Neg, self)
    }
}

impl ops::Not for Expr {
    type Output = Self;
    fn not(self) -> Self {
        Self::unary(UnaryOp::Not, self)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::real(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Self::bool(value)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fluent_builder_splits_vars_and_objects() {
        let e = Expr::fluent("adj", ["?z", "z2"]);
        assert_eq!(
            e,
            Expr::Fluent {
                name: "adj".into(),
                args: vec![Arg::Var("?z".into()), Arg::Object("z2".into())]
            }
        );
    }

    #[test]
    fn operators_build_binary_nodes() {
        let e = Expr::scalar("a") + Expr::real(1.0) * Expr::scalar("b");
        match e {
            Expr::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => assert!(matches!(
                *rhs,
                Expr::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            _ => panic!("expected an addition"),
        }
    }

    #[test]
    fn fluent_refs_include_nested_and_filters() {
        let e = Expr::sum(&[("?h", "heater")], Expr::fluent("heat", ["?h"]))
            .filtered(Expr::fluent("adj", ["?h", "?z"]));
        let mut refs = e.fluent_refs();
        refs.sort_unstable();
        assert_eq!(refs, ["adj", "heat"]);
    }

    #[test]
    fn switch_children_start_with_selector() {
        let e = Expr::switch(Expr::scalar("mode"), [Expr::scalar("a"), Expr::real(2.0)]);
        assert_eq!(e.children().len(), 3);
        assert_eq!(e.fluent_refs(), ["mode", "a"]);
    }
}
