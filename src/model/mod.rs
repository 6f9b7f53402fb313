//! Declarative transition and reward models.
//!
//! A [`Model`] is produced by an external parser and is immutable afterwards.
//! All fluents are grounded over the objects of their parameter types.
mod expr;
#[cfg(test)]
pub mod testing;

pub use expr::{AggregateOp, Arg, BinaryOp, Distribution, Expr, UnaryOp};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named finite set of objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    pub name: String,
    /// Objects in index order.
    pub objects: Vec<String>,
}

impl ObjectType {
    pub fn new<I, S>(name: &str, objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            objects: objects.into_iter().map(Into::into).collect(),
        }
    }

    /// Index of an object within this type.
    pub fn index_of(&self, object: &str) -> Option<usize> {
        self.objects.iter().position(|o| o == object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FluentKind {
    /// Constant for the lifetime of the model.
    NonFluent,
    /// Updated once per step by its update function; persists across steps.
    State,
    /// Recomputed each step; not carried across steps.
    Interm,
    /// Supplied externally each step.
    Action,
}

impl fmt::Display for FluentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::NonFluent => "non-fluent",
            Self::State => "state-fluent",
            Self::Interm => "interm-fluent",
            Self::Action => "action-fluent",
        };
        f.write_str(name)
    }
}

/// Value domain of a fluent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueRange {
    Bool,
    Int,
    Real,
    /// An object of the named type, stored as its index.
    Object(String),
}

/// A scalar literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Real(f64),
    Object(String),
}

impl Literal {
    /// The default literal of a value range.
    pub fn default_for(range: &ValueRange) -> Self {
        match range {
            ValueRange::Bool => Self::Bool(false),
            ValueRange::Int => Self::Int(0),
            ValueRange::Real => Self::Real(0.0),
            ValueRange::Object(_) => Self::Int(0),
        }
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Initial value of a grounded fluent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InitValue {
    /// The same value for every grounding.
    Scalar(Literal),
    /// One value per grounding in row-major order. `None` takes the fluent default.
    List(Vec<Option<Literal>>),
}

impl From<Literal> for InitValue {
    fn from(value: Literal) -> Self {
        Self::Scalar(value)
    }
}

impl From<f64> for InitValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<bool> for InitValue {
    fn from(value: bool) -> Self {
        Self::Scalar(value.into())
    }
}

impl InitValue {
    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Literal>,
    {
        Self::List(values.into_iter().map(|v| Some(v.into())).collect())
    }
}

/// Declaration of a fluent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluentDecl {
    pub name: String,
    pub kind: FluentKind,
    /// Parameter type names.
    pub params: Vec<String>,
    pub range: ValueRange,
    /// Value used when absent from an override mapping.
    pub default: Literal,
}

impl FluentDecl {
    pub fn new(name: &str, kind: FluentKind, params: &[&str], range: ValueRange) -> Self {
        let default = Literal::default_for(&range);
        Self {
            name: name.into(),
            kind,
            params: params.iter().map(|&p| p.to_owned()).collect(),
            range,
            default,
        }
    }

    #[must_use]
    pub fn with_default<L: Into<Literal>>(mut self, default: L) -> Self {
        self.default = default.into();
        self
    }
}

/// Conditional update function of a state or interm fluent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cpf {
    /// Name of the defined fluent.
    pub fluent: String,
    /// Variable names bound to the fluent parameters, in order.
    pub params: Vec<String>,
    pub expr: Expr,
}

impl Cpf {
    pub fn new(fluent: &str, params: &[&str], expr: Expr) -> Self {
        Self {
            fluent: fluent.into(),
            params: params.iter().map(|&p| p.to_owned()).collect(),
            expr,
        }
    }
}

/// A lower and upper bound on an action fluent. `None` is unbounded.
pub type Bounds = (Option<f64>, Option<f64>);

/// A parsed planning model together with its instance data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub types: Vec<ObjectType>,
    /// Fluent declarations in declaration order.
    pub fluents: Vec<FluentDecl>,
    pub cpfs: Vec<Cpf>,
    pub reward: Expr,
    /// State-action constraints. Checked post-hoc, never inside the gradient loop.
    #[serde(default)]
    pub preconditions: Vec<Expr>,
    #[serde(default)]
    pub non_fluents: BTreeMap<String, InitValue>,
    #[serde(default)]
    pub init_state: BTreeMap<String, InitValue>,
    #[serde(default)]
    pub action_bounds: BTreeMap<String, Bounds>,
    /// Maximum number of boolean actions that may differ from their default at once.
    #[serde(default)]
    pub max_nondef_actions: Option<usize>,
    pub horizon: usize,
}

impl Model {
    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn fluent(&self, name: &str) -> Option<&FluentDecl> {
        self.fluents.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_json_roundtrip() {
        let model = testing::noisy_hvac(3, 2, 0.5);
        let json = serde_json::to_string(&model).unwrap();
        let parsed: Model = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, model);
    }

    #[test]
    fn optional_sections_default() {
        let json = r#"{
            "name": "empty",
            "types": [],
            "fluents": [],
            "cpfs": [],
            "reward": {"Constant": {"Real": 0.0}},
            "horizon": 3
        }"#;
        let model: Model = serde_json::from_str(json).unwrap();
        assert!(model.preconditions.is_empty());
        assert_eq!(model.max_nondef_actions, None);
        assert_eq!(model.reward, Expr::real(0.0));
    }
}
