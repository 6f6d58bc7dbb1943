//! # normgrad
//!
//! Batch normalization with a layer-agnostic numerical gradient checker.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ```rust
//! use normgrad::prelude::*;
//!
//! let mut bn = BatchNorm::with_affine(false);
//! bn.initialize(&Shape::from(1))?;
//! let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], (4, 1))?;
//! let mut y = Tensor::zeros((4, 1));
//! bn.forward(&x, &mut y)?;
//! assert!((bn.mean().to_vec()[0] - 2.5).abs() < 1e-12);
//! # Ok::<(), normgrad::Error>(())
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `normgrad-core` | Tensor, Shape, Layout, Accuracy, Error |
//! | `normgrad-nn` | Function trait, BatchNorm, NumericalGradient, GradientCheck |

/// Re-export core types.
pub use normgrad_core::{
    Accuracy, DType, Error, Layout, Result, Shape, StridedIter, Tensor, TEST_TOL_F64,
};

/// Re-export layers and gradient checking.
pub mod nn {
    pub use normgrad_nn::*;
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{
        BatchNorm, BatchNormConfig, Function, GradientCase, GradientCheck, NumericalGradient,
    };
    pub use crate::{Accuracy, Error, Result, Shape, Tensor};
}
