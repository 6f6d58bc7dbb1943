use std::fmt;

/// Element type of a tensor.
///
/// Tensors in this crate always hold `f64`. The enum exists so a layer can
/// report the element type it operates on (`Function::tensor_type`) and a
/// checker can refuse to mix precisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}
