//! Fluent dependency graph
use super::{CompileError, EvaluationOrder, FluentInfo};
use crate::model::{Cpf, FluentKind};
use std::collections::BTreeMap;

/// Dependencies between fluents with update functions.
///
/// Node `b` depends on `a` iff the update function of `b` references `a`.
/// Only interm fluents impose an order: state fluents are always read at their current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Fluents with an update function in declaration order, with their kind.
    nodes: Vec<(String, FluentKind)>,
    /// Referenced fluents of each node, deduplicated, in declaration order.
    dependencies: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

impl DependencyGraph {
    pub(super) fn new(
        fluents: &BTreeMap<String, FluentInfo>,
        cpfs: &BTreeMap<String, Cpf>,
    ) -> Self {
        let mut nodes: Vec<_> = cpfs
            .keys()
            .filter_map(|name| fluents.get(name))
            .map(|info| (info.index, info.name.clone(), info.kind))
            .collect();
        nodes.sort_unstable_by_key(|(index, _, _)| *index);

        let dependencies = cpfs
            .iter()
            .map(|(name, cpf)| {
                let mut deps: Vec<_> = cpf
                    .expr
                    .fluent_refs()
                    .into_iter()
                    .filter_map(|dep| fluents.get(dep))
                    .map(|info| (info.index, info.name.clone()))
                    .collect();
                deps.sort_unstable();
                deps.dedup();
                (name.clone(), deps.into_iter().map(|(_, n)| n).collect())
            })
            .collect();

        Self {
            nodes: nodes.into_iter().map(|(_, n, k)| (n, k)).collect(),
            dependencies,
        }
    }

    /// All fluents referenced by the update function of `fluent`.
    pub fn dependencies(&self, fluent: &str) -> &[String] {
        self.dependencies
            .get(fluent)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn is_interm(&self, fluent: &str) -> bool {
        self.nodes
            .iter()
            .any(|(n, k)| n == fluent && *k == FluentKind::Interm)
    }

    /// Topologically sort the interm fluents then append the state fluents.
    ///
    /// Ties are broken by declaration order.
    pub fn evaluation_order(&self) -> Result<EvaluationOrder, CompileError> {
        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        let mut interms = Vec::new();
        for (name, kind) in &self.nodes {
            if *kind == FluentKind::Interm {
                self.visit(name, &mut marks, &mut path, &mut interms)?;
            }
        }
        let states = self
            .nodes
            .iter()
            .filter(|(_, kind)| *kind == FluentKind::State)
            .map(|(name, _)| name.clone())
            .collect();
        Ok(EvaluationOrder { interms, states })
    }

    /// Depth-first post-order traversal.
    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::OnPath) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|&n| n.to_owned()).collect();
                cycle.push(node.to_owned());
                return Err(CompileError::CyclicDependency { cycle });
            }
            None => {}
        }
        marks.insert(node, Mark::OnPath);
        path.push(node);
        for dep in self.dependencies(node) {
            if self.is_interm(dep) {
                self.visit(dep, marks, path, order)?;
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        order.push(node.to_owned());
        Ok(())
    }
}
