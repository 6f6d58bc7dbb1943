use crate::shape::Shape;

/// All errors that can occur within normgrad.
///
/// Every failure here is a caller contract violation: wrong shapes, a
/// mini-batch too small to have a standard deviation, a layer used before
/// `initialize`, or a gradient comparison that did not hold. None of them
/// are transient, so nothing is ever retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors (e.g., feeding [4, 3] to a layer initialized for [5]).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Narrow/slice operation out of bounds.
    #[error("narrow out of bounds: dim {dim}, start {start}, len {len}, dim_size {dim_size}")]
    NarrowOutOfBounds {
        dim: usize,
        start: usize,
        len: usize,
        dim_size: usize,
    },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// The flat buffer cannot hold every element addressed by a layout.
    #[error("buffer too small: layout addresses index {required}, buffer has {len} elements")]
    BufferTooSmall { required: usize, len: usize },

    /// A layer was handed tensors of an element type it does not operate on.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// The caller broke an argument contract (mini-batch too small, wrong parameter count).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A layer was used before `initialize` was called.
    #[error("{0} has not been initialized")]
    NotInitialized(&'static str),

    /// Two tensors differ beyond the requested accuracy.
    #[error("value mismatch at {index:?}: expected {expected}, found {found} (relative {relative}, absolute {absolute})")]
    ValueMismatch {
        index: Vec<usize>,
        expected: f64,
        found: f64,
        relative: f64,
        absolute: f64,
    },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout normgrad.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted `InvalidArgument` error.
/// Usage: `bail!("mini-batch must be larger than 1, got {}", n)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::InvalidArgument(format!($($arg)*)))
    };
}
