//! # normgrad-nn
//!
//! A batch normalization layer and the tools to verify layer gradients.
//!
//! 1. **Function trait**: `initialize` / `set_parameters` / `forward` / `backwards`
//! 2. **BatchNorm**: per-feature mini-batch statistics with optional gamma/beta
//! 3. **NumericalGradient**: central finite differences through any `Function`
//! 4. **GradientCheck**: compares a layer's `backwards` against the numerical estimate

pub mod batchnorm;
pub mod check;
pub mod function;
pub mod numerical;

pub use batchnorm::{BatchNorm, BatchNormConfig, DEFAULT_EPS};
pub use check::{random_parameters, GradientCase, GradientCheck};
pub use function::Function;
pub use numerical::{NumericalGradient, DEFAULT_STEP};
