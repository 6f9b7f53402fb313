//! Scope and type checking of expressions.
use super::{CompileError, FluentInfo};
use crate::model::{AggregateOp, Arg, Cpf, Distribution, Expr, FluentKind, Literal};
use std::collections::{BTreeMap, BTreeSet};

pub(super) struct Checker<'a> {
    pub fluents: &'a BTreeMap<String, FluentInfo>,
    pub objects: &'a BTreeMap<String, (String, i64)>,
    pub type_sizes: &'a BTreeMap<String, i64>,
}

/// Variables in scope, innermost last.
type Scope = Vec<(String, String)>;

impl<'a> Checker<'a> {
    pub fn check_cpf(&self, cpf: &Cpf) -> Result<(), CompileError> {
        let context = format!("cpf {}", cpf.fluent);
        // The fluent is known to exist at this point
        let info = &self.fluents[&cpf.fluent];
        if cpf.params.len() != info.param_types.len() {
            return Err(CompileError::ArityMismatch {
                fluent: cpf.fluent.clone(),
                expected: info.param_types.len(),
                actual: cpf.params.len(),
                context,
            });
        }
        let mut seen = BTreeSet::new();
        for param in &cpf.params {
            if !seen.insert(param) {
                return Err(CompileError::DuplicateDefinition {
                    name: format!("{} in {}", param, context),
                });
            }
        }
        let mut scope: Scope = cpf
            .params
            .iter()
            .cloned()
            .zip(info.param_types.iter().cloned())
            .collect();
        self.check(&cpf.expr, &mut scope, &context, &[])
    }

    /// Check a top-level expression without free variables.
    ///
    /// References to fluents of a kind in `forbidden` are rejected.
    pub fn check_root(
        &self,
        expr: &Expr,
        context: &str,
        forbidden: &[FluentKind],
    ) -> Result<(), CompileError> {
        self.check(expr, &mut Vec::new(), context, forbidden)
    }

    fn check(
        &self,
        expr: &Expr,
        scope: &mut Scope,
        context: &str,
        forbidden: &[FluentKind],
    ) -> Result<(), CompileError> {
        match expr {
            Expr::Constant(Literal::Object(name)) => {
                if self.objects.contains_key(name) {
                    Ok(())
                } else {
                    Err(CompileError::UndefinedObject {
                        name: name.clone(),
                        context: context.into(),
                    })
                }
            }
            Expr::Constant(_) => Ok(()),
            Expr::Fluent { name, args } => {
                self.check_reference(name, args, scope, context, forbidden)
            }
            Expr::Aggregate {
                op,
                vars,
                filter,
                body,
            } => {
                if vars.is_empty() {
                    return Err(CompileError::InvalidAggregate {
                        detail: "no variables".into(),
                        context: context.into(),
                    });
                }
                if matches!(op, AggregateOp::Argmax | AggregateOp::Argmin) && vars.len() != 1 {
                    return Err(CompileError::InvalidAggregate {
                        detail: format!("{:?} takes exactly one variable", op),
                        context: context.into(),
                    });
                }
                for (var, type_name) in vars {
                    if !self.type_sizes.contains_key(type_name) {
                        return Err(CompileError::UndefinedType {
                            name: type_name.clone(),
                            context: context.into(),
                        });
                    }
                    scope.push((var.clone(), type_name.clone()));
                }
                let result = filter
                    .iter()
                    .map(AsRef::as_ref)
                    .chain(std::iter::once(body.as_ref()))
                    .try_for_each(|e| self.check(e, scope, context, forbidden));
                scope.truncate(scope.len() - vars.len());
                result
            }
            Expr::Switch { cases, .. } if cases.is_empty() => Err(CompileError::EmptySwitch {
                context: context.into(),
            }),
            Expr::Sample(Distribution::Discrete(probs)) if probs.is_empty() => {
                Err(CompileError::InvalidDistribution {
                    distribution: "Discrete",
                    detail: "no outcomes".into(),
                    context: context.into(),
                })
            }
            other => other
                .children()
                .into_iter()
                .try_for_each(|e| self.check(e, scope, context, forbidden)),
        }
    }

    fn check_reference(
        &self,
        name: &str,
        args: &[Arg],
        scope: &mut Scope,
        context: &str,
        forbidden: &[FluentKind],
    ) -> Result<(), CompileError> {
        let info = self
            .fluents
            .get(name)
            .ok_or_else(|| CompileError::UndefinedFluent {
                name: name.into(),
                context: context.into(),
            })?;
        if forbidden.contains(&info.kind) {
            return Err(CompileError::InvalidReference {
                fluent: name.into(),
                context: context.into(),
            });
        }
        if args.len() != info.param_types.len() {
            return Err(CompileError::ArityMismatch {
                fluent: name.into(),
                expected: info.param_types.len(),
                actual: args.len(),
                context: context.into(),
            });
        }
        for (arg, expected) in args.iter().zip(&info.param_types) {
            match arg {
                Arg::Var(var) => {
                    let (_, actual) = scope.iter().rev().find(|(v, _)| v == var).ok_or_else(
                        || CompileError::UnboundVariable {
                            var: var.clone(),
                            context: context.into(),
                        },
                    )?;
                    if actual != expected {
                        return Err(CompileError::TypeMismatch {
                            var: var.clone(),
                            expected: expected.clone(),
                            actual: actual.clone(),
                            context: context.into(),
                        });
                    }
                }
                Arg::Object(object) => match self.objects.get(object) {
                    Some((object_type, _)) if object_type == expected => {}
                    Some(_) => {
                        return Err(CompileError::InvalidObject {
                            object: object.clone(),
                            type_name: expected.clone(),
                            context: context.into(),
                        })
                    }
                    None => {
                        return Err(CompileError::UndefinedObject {
                            name: object.clone(),
                            context: context.into(),
                        })
                    }
                },
                Arg::Nested(inner) => self.check(inner, scope, context, forbidden)?,
            }
        }
        Ok(())
    }
}
