//! General utilities
pub mod stats;
pub mod tensor;
