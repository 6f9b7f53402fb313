//! Tensor utilities
use crate::Fluents;
use tch::{Device, Kind, Tensor};

/// Tensor options used for all values: double precision on the CPU.
pub const OPTIONS: (Kind, Device) = (Kind::Double, Device::Cpu);

/// Flatten a tensor into a vector of `f64` in row-major order.
pub fn to_vec(tensor: &Tensor) -> Vec<f64> {
    Vec::<f64>::from(&tensor.to_kind(Kind::Double).contiguous().reshape(&[-1]))
}

/// Build a double tensor with the given shape from row-major data.
pub fn from_vec(data: &[f64], shape: &[i64]) -> Tensor {
    Tensor::of_slice(data).reshape(shape)
}

/// Whether any element of a (boolean) mask is set.
pub fn any(mask: &Tensor) -> bool {
    mask.any().to_kind(Kind::Int64).int64_value(&[]) != 0
}

/// Multi-index of the first set element of a mask, if any.
pub fn first_index(mask: &Tensor) -> Option<Vec<i64>> {
    let indices = mask.nonzero();
    if indices.size()[0] == 0 {
        return None;
    }
    let ndim = indices.size()[1];
    Some((0..ndim).map(|d| indices.int64_value(&[0, d])).collect())
}

/// Repeat a tensor with a unit leading axis to a leading axis of size `batch`.
pub fn expand_batch(tensor: &Tensor, batch: i64) -> Tensor {
    let mut shape = tensor.size();
    match shape.first_mut() {
        Some(lead) if *lead == 1 && batch != 1 => {
            *lead = batch;
            tensor.expand(&shape, false)
        }
        _ => tensor.shallow_clone(),
    }
}

/// Copy a map of values, sharing their storage.
pub fn shallow_copy(values: &Fluents) -> Fluents {
    values
        .iter()
        .map(|(name, value)| (name.clone(), value.shallow_clone()))
        .collect()
}
