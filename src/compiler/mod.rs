//! Model graph compiler.
//!
//! Validates a [`Model`], grounds every fluent over its parameter types and computes the order
//! in which update functions are evaluated. The result is shared read-only by every evaluator
//! and roll-out.
mod check;
mod graph;
mod init;

pub use graph::DependencyGraph;

use crate::logic::Operator;
use crate::model::{Cpf, Expr, FluentKind, Literal, Model, ValueRange};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tch::Tensor;
use thiserror::Error;

/// Error compiling a model. All variants are fatal and reported before any evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("cyclic dependency between fluents: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("relaxation does not support {op} (in {context})")]
    UnsupportedRelaxation { op: String, context: String },
    #[error("{distribution} has no reparameterization (in {context})")]
    NonReparameterizable {
        distribution: &'static str,
        context: String,
    },
    #[error("<{fluent}>: expected {expected} values, got {actual}")]
    ShapeMismatch {
        fluent: String,
        expected: usize,
        actual: usize,
    },
    #[error("undefined fluent <{name}> (in {context})")]
    UndefinedFluent { name: String, context: String },
    #[error("undefined type <{name}> (in {context})")]
    UndefinedType { name: String, context: String },
    #[error("undefined object <{name}> (in {context})")]
    UndefinedObject { name: String, context: String },
    #[error("object <{object}> is not of type <{type_name}> (in {context})")]
    InvalidObject {
        object: String,
        type_name: String,
        context: String,
    },
    #[error("unbound variable {var} (in {context})")]
    UnboundVariable { var: String, context: String },
    #[error("<{fluent}> takes {expected} arguments, got {actual} (in {context})")]
    ArityMismatch {
        fluent: String,
        expected: usize,
        actual: usize,
        context: String,
    },
    #[error("variable {var} has type <{actual}>, expected <{expected}> (in {context})")]
    TypeMismatch {
        var: String,
        expected: String,
        actual: String,
        context: String,
    },
    #[error("<{fluent}> may not be referenced here (in {context})")]
    InvalidReference { fluent: String, context: String },
    #[error("{kind} <{fluent}> has no update function")]
    MissingCpf { fluent: String, kind: FluentKind },
    #[error("{kind} <{fluent}> may not have an update function")]
    UnexpectedCpf { fluent: String, kind: FluentKind },
    #[error("<{name}> is defined more than once")]
    DuplicateDefinition { name: String },
    #[error("invalid value {value:?} for <{fluent}> of range {range:?}")]
    InvalidLiteral {
        fluent: String,
        value: Literal,
        range: ValueRange,
    },
    #[error("invalid aggregation: {detail} (in {context})")]
    InvalidAggregate { detail: String, context: String },
    #[error("invalid {distribution}: {detail} (in {context})")]
    InvalidDistribution {
        distribution: &'static str,
        detail: String,
        context: String,
    },
    #[error("switch has no cases (in {context})")]
    EmptySwitch { context: String },
    #[error("type <{name}> has no objects")]
    EmptyType { name: String },
}

/// Grounding and value metadata of one fluent.
#[derive(Debug, Clone, PartialEq)]
pub struct FluentInfo {
    pub name: String,
    pub kind: FluentKind,
    pub range: ValueRange,
    pub param_types: Vec<String>,
    /// Object counts of the parameter types.
    pub shape: Vec<i64>,
    /// Numeric default value (booleans as 0 or 1, objects as their index).
    pub default: f64,
    /// Position in declaration order.
    pub index: usize,
}

impl FluentInfo {
    /// Shape of a batched value: `[batch, shape...]`.
    pub fn batched_shape(&self, batch: i64) -> Vec<i64> {
        let mut shape = Vec::with_capacity(self.shape.len() + 1);
        shape.push(batch);
        shape.extend_from_slice(&self.shape);
        shape
    }

    /// Number of grounded variables.
    pub fn size(&self) -> usize {
        self.shape.iter().product::<i64>() as usize
    }

    pub fn is_bool(&self) -> bool {
        self.range == ValueRange::Bool
    }
}

/// Order in which update functions are evaluated within one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationOrder {
    /// Interm fluents, topologically sorted.
    pub interms: Vec<String>,
    /// State fluents in declaration order. Each reads only current-step values.
    pub states: Vec<String>,
}

impl EvaluationOrder {
    /// All fluents with an update function in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.interms.iter().chain(&self.states).map(String::as_str)
    }
}

/// A validated, grounded model.
#[derive(Debug)]
pub struct CompiledModel {
    model: Model,
    fluents: BTreeMap<String, FluentInfo>,
    /// Object name to `(type, index)`.
    objects: BTreeMap<String, (String, i64)>,
    type_sizes: BTreeMap<String, i64>,
    cpfs: BTreeMap<String, Cpf>,
    graph: DependencyGraph,
    order: EvaluationOrder,
    /// Initial values of non-fluents, state fluents and action fluents. Shape `[1, ...]`.
    initial: BTreeMap<String, Tensor>,
    operators: HashSet<Operator>,
    distributions: BTreeSet<&'static str>,
}

/// Compile a model into a grounded evaluation order.
pub fn compile(model: &Model) -> Result<CompiledModel, CompileError> {
    CompiledModel::new(model.clone())
}

impl CompiledModel {
    pub fn new(model: Model) -> Result<Self, CompileError> {
        let mut type_sizes = BTreeMap::new();
        let mut objects = BTreeMap::new();
        for object_type in &model.types {
            if object_type.objects.is_empty() {
                return Err(CompileError::EmptyType {
                    name: object_type.name.clone(),
                });
            }
            if type_sizes
                .insert(object_type.name.clone(), object_type.objects.len() as i64)
                .is_some()
            {
                return Err(CompileError::DuplicateDefinition {
                    name: object_type.name.clone(),
                });
            }
            for (i, object) in object_type.objects.iter().enumerate() {
                if objects
                    .insert(object.clone(), (object_type.name.clone(), i as i64))
                    .is_some()
                {
                    return Err(CompileError::DuplicateDefinition {
                        name: object.clone(),
                    });
                }
            }
        }

        let mut fluents = BTreeMap::new();
        for (index, decl) in model.fluents.iter().enumerate() {
            let context = format!("declaration of {}", decl.name);
            let shape = decl
                .params
                .iter()
                .map(|t| {
                    type_sizes
                        .get(t)
                        .copied()
                        .ok_or_else(|| CompileError::UndefinedType {
                            name: t.clone(),
                            context: context.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if let ValueRange::Object(t) = &decl.range {
                if !type_sizes.contains_key(t) {
                    return Err(CompileError::UndefinedType {
                        name: t.clone(),
                        context,
                    });
                }
            }
            let default = literal_value(&decl.name, &decl.default, &decl.range, &objects)?;
            let info = FluentInfo {
                name: decl.name.clone(),
                kind: decl.kind,
                range: decl.range.clone(),
                param_types: decl.params.clone(),
                shape,
                default,
                index,
            };
            if fluents.insert(decl.name.clone(), info).is_some() {
                return Err(CompileError::DuplicateDefinition {
                    name: decl.name.clone(),
                });
            }
        }

        let mut cpfs = BTreeMap::new();
        for cpf in &model.cpfs {
            let info = fluents
                .get(&cpf.fluent)
                .ok_or_else(|| CompileError::UndefinedFluent {
                    name: cpf.fluent.clone(),
                    context: "update functions".into(),
                })?;
            if !matches!(info.kind, FluentKind::State | FluentKind::Interm) {
                return Err(CompileError::UnexpectedCpf {
                    fluent: cpf.fluent.clone(),
                    kind: info.kind,
                });
            }
            if cpfs.insert(cpf.fluent.clone(), cpf.clone()).is_some() {
                return Err(CompileError::DuplicateDefinition {
                    name: cpf.fluent.clone(),
                });
            }
        }
        for info in fluents.values() {
            if matches!(info.kind, FluentKind::State | FluentKind::Interm)
                && !cpfs.contains_key(&info.name)
            {
                return Err(CompileError::MissingCpf {
                    fluent: info.name.clone(),
                    kind: info.kind,
                });
            }
        }

        let checker = check::Checker {
            fluents: &fluents,
            objects: &objects,
            type_sizes: &type_sizes,
        };
        for cpf in cpfs.values() {
            checker.check_cpf(cpf)?;
        }
        checker.check_root(&model.reward, "reward", &[])?;
        for (i, precondition) in model.preconditions.iter().enumerate() {
            let context = format!("precondition {}", i);
            checker.check_root(precondition, &context, &[FluentKind::Interm])?;
        }
        for (name, bounds) in &model.action_bounds {
            match fluents.get(name) {
                Some(info) if info.kind == FluentKind::Action => {}
                _ => {
                    return Err(CompileError::InvalidReference {
                        fluent: name.clone(),
                        context: format!("action bounds {:?}", bounds),
                    })
                }
            }
        }

        let graph = DependencyGraph::new(&fluents, &cpfs);
        let order = graph.evaluation_order()?;
        let initial = init::initial_values(&model, &fluents, &objects)?;

        let mut operators = HashSet::new();
        let mut distributions = BTreeSet::new();
        let roots = cpfs.values().map(|cpf| &cpf.expr);
        for root in roots.chain(Some(&model.reward)).chain(&model.preconditions) {
            root.visit(&mut |e| {
                if let Some(op) = Operator::of(e) {
                    operators.insert(op);
                }
                if let Expr::Sample(dist) = e {
                    distributions.insert(dist.name());
                }
            });
        }

        Ok(Self {
            model,
            fluents,
            objects,
            type_sizes,
            cpfs,
            graph,
            order,
            initial,
            operators,
            distributions,
        })
    }

    pub const fn model(&self) -> &Model {
        &self.model
    }

    pub const fn order(&self) -> &EvaluationOrder {
        &self.order
    }

    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Operator families used anywhere in the model.
    pub const fn operators(&self) -> &HashSet<Operator> {
        &self.operators
    }

    /// Names of the distribution families sampled anywhere in the model.
    pub const fn distributions(&self) -> &BTreeSet<&'static str> {
        &self.distributions
    }

    pub fn fluent(&self, name: &str) -> Option<&FluentInfo> {
        self.fluents.get(name)
    }

    /// Fluent metadata in declaration order.
    pub fn fluents(&self) -> impl Iterator<Item = &FluentInfo> {
        let mut infos: Vec<_> = self.fluents.values().collect();
        infos.sort_by_key(|info| info.index);
        infos.into_iter()
    }

    /// Fluents of a kind in declaration order.
    pub fn fluents_of(&self, kind: FluentKind) -> impl Iterator<Item = &FluentInfo> {
        self.fluents().filter(move |info| info.kind == kind)
    }

    pub fn cpf(&self, fluent: &str) -> Option<&Cpf> {
        self.cpfs.get(fluent)
    }

    pub fn type_size(&self, name: &str) -> Option<i64> {
        self.type_sizes.get(name).copied()
    }

    /// `(type, index)` of an object.
    pub fn object(&self, name: &str) -> Option<(&str, i64)> {
        self.objects.get(name).map(|(t, i)| (t.as_str(), *i))
    }

    /// The initial (or default) value of a non-fluent, state or action fluent.
    ///
    /// Shape `[1, shape...]`.
    pub fn initial_value(&self, name: &str) -> Option<&Tensor> {
        self.initial.get(name)
    }

    /// Initial values of all state fluents.
    pub fn initial_state(&self) -> BTreeMap<String, Tensor> {
        self.fluents_of(FluentKind::State)
            .filter_map(|info| {
                self.initial
                    .get(&info.name)
                    .map(|t| (info.name.clone(), t.shallow_clone()))
            })
            .collect()
    }

    /// Default values of all action fluents.
    pub fn default_actions(&self) -> BTreeMap<String, Tensor> {
        self.fluents_of(FluentKind::Action)
            .filter_map(|info| {
                self.initial
                    .get(&info.name)
                    .map(|t| (info.name.clone(), t.shallow_clone()))
            })
            .collect()
    }

    /// The update function and reward expressions paired with where they appear.
    ///
    /// Preconditions are excluded: they are only ever evaluated exactly.
    pub fn expressions(&self) -> impl Iterator<Item = (String, &Expr)> {
        self.order
            .iter()
            .filter_map(move |name| {
                self.cpfs
                    .get(name)
                    .map(|cpf| (format!("cpf {}", name), &cpf.expr))
            })
            .chain(std::iter::once(("reward".to_owned(), &self.model.reward)))
    }
}

/// Numeric value of a literal for a fluent of the given range.
fn literal_value(
    fluent: &str,
    literal: &Literal,
    range: &ValueRange,
    objects: &BTreeMap<String, (String, i64)>,
) -> Result<f64, CompileError> {
    let invalid = || CompileError::InvalidLiteral {
        fluent: fluent.into(),
        value: literal.clone(),
        range: range.clone(),
    };
    match (range, literal) {
        (ValueRange::Bool, Literal::Bool(b)) => Ok(f64::from(u8::from(*b))),
        (ValueRange::Int | ValueRange::Real, Literal::Int(i)) => Ok(*i as f64),
        (ValueRange::Int, Literal::Real(x)) if x.fract() == 0.0 => Ok(*x),
        (ValueRange::Real, Literal::Real(x)) => Ok(*x),
        (ValueRange::Object(_), Literal::Int(i)) => Ok(*i as f64),
        (ValueRange::Object(t), Literal::Object(o)) => match objects.get(o) {
            Some((object_type, index)) if object_type == t => Ok(*index as f64),
            Some(_) => Err(invalid()),
            None => Err(CompileError::UndefinedObject {
                name: o.clone(),
                context: format!("value of {}", fluent),
            }),
        },
        _ => Err(invalid()),
    }
}
