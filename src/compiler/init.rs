//! Initial values of grounded fluents.
use super::{literal_value, CompileError, FluentInfo};
use crate::model::{FluentKind, InitValue, Model};
use std::collections::BTreeMap;
use tch::Tensor;

/// Build the initial tensor of every non-fluent, state fluent and action fluent.
///
/// Values missing from the instance take the fluent default.
/// List values are in row-major order over the grounding.
/// Each tensor has shape `[1, shape...]` and kind `Double`.
pub(super) fn initial_values(
    model: &Model,
    fluents: &BTreeMap<String, FluentInfo>,
    objects: &BTreeMap<String, (String, i64)>,
) -> Result<BTreeMap<String, Tensor>, CompileError> {
    check_overrides(&model.non_fluents, fluents, FluentKind::NonFluent, "non-fluents")?;
    check_overrides(&model.init_state, fluents, FluentKind::State, "init-state")?;

    let mut values = BTreeMap::new();
    for info in fluents.values() {
        let init = match info.kind {
            FluentKind::NonFluent => model.non_fluents.get(&info.name),
            FluentKind::State => model.init_state.get(&info.name),
            FluentKind::Action => None,
            FluentKind::Interm => continue,
        };
        let size = info.size();
        let data = match init {
            None => vec![info.default; size],
            Some(InitValue::Scalar(literal)) => {
                vec![literal_value(&info.name, literal, &info.range, objects)?; size]
            }
            Some(InitValue::List(list)) => {
                if list.len() != size {
                    return Err(CompileError::ShapeMismatch {
                        fluent: info.name.clone(),
                        expected: size,
                        actual: list.len(),
                    });
                }
                list.iter()
                    .map(|v| match v {
                        Some(literal) => literal_value(&info.name, literal, &info.range, objects),
                        None => Ok(info.default),
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        let tensor = Tensor::of_slice(&data).reshape(&info.batched_shape(1));
        values.insert(info.name.clone(), tensor);
    }
    Ok(values)
}

fn check_overrides(
    overrides: &BTreeMap<String, InitValue>,
    fluents: &BTreeMap<String, FluentInfo>,
    kind: FluentKind,
    context: &str,
) -> Result<(), CompileError> {
    for name in overrides.keys() {
        match fluents.get(name) {
            Some(info) if info.kind == kind => {}
            Some(_) => {
                return Err(CompileError::InvalidReference {
                    fluent: name.clone(),
                    context: context.into(),
                })
            }
            None => {
                return Err(CompileError::UndefinedFluent {
                    name: name.clone(),
                    context: context.into(),
                })
            }
        }
    }
    Ok(())
}
