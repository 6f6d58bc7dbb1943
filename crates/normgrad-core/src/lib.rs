//! # normgrad-core
//!
//! Tensor primitives shared by the layers and the gradient checker.
//!
//! This crate provides:
//! - [`Tensor`]: an `f64` flat buffer with an explicit [`Layout`]
//! - [`Shape`] / [`Layout`]: shape, strides, start offset, and the
//!   rank-agnostic [`StridedIter`] over every element of a tensor
//! - [`Accuracy`]: (relative, absolute) tolerance for comparing tensors
//! - [`Error`] / [`Result`]: the error type used across the workspace

pub mod accuracy;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod shape;
pub mod tensor;

pub use accuracy::{Accuracy, TEST_TOL_F64};
pub use dtype::DType;
pub use error::{Error, Result};
pub use layout::{Layout, StridedIter};
pub use shape::Shape;
pub use tensor::Tensor;
