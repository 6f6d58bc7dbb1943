use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Standard tolerance for comparing `f64` results in tests.
pub const TEST_TOL_F64: f64 = 1e-8;

/// A (relative, absolute) tolerance pair for comparing floating-point tensors.
///
/// Two values `a` and `b` match when
/// `|a - b| <= absolute + relative * max(|a|, |b|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accuracy {
    pub relative: f64,
    pub absolute: f64,
}

impl Accuracy {
    /// Tight tolerance for results computed with the same arithmetic.
    pub const STANDARD: Accuracy = Accuracy {
        relative: TEST_TOL_F64,
        absolute: TEST_TOL_F64,
    };

    /// Loose tolerance for comparing against finite-difference estimates.
    pub const RELAXED: Accuracy = Accuracy {
        relative: 1e-4,
        absolute: 1e-5,
    };

    pub fn new(relative: f64, absolute: f64) -> Self {
        Accuracy { relative, absolute }
    }

    pub fn is_close(&self, a: f64, b: f64) -> bool {
        let diff = (a - b).abs();
        diff <= self.absolute + self.relative * a.abs().max(b.abs())
    }

    /// Compare two tensors element by element in logical order.
    ///
    /// Fails with `ShapeMismatch` if the shapes differ and with
    /// `ValueMismatch` at the first element outside the tolerance. NaN never
    /// matches anything.
    pub fn compare(&self, expected: &Tensor, found: &Tensor) -> Result<()> {
        if expected.shape() != found.shape() {
            return Err(Error::ShapeMismatch {
                expected: expected.shape().clone(),
                got: found.shape().clone(),
            });
        }
        let mut positions = expected.strided_indices();
        let mut found_indices = found.strided_indices();
        loop {
            let index = positions.position().to_vec();
            let (e, f) = match (positions.next(), found_indices.next()) {
                (Some(e), Some(f)) => (expected.storage()[e], found.storage()[f]),
                _ => return Ok(()),
            };
            if !self.is_close(e, f) {
                return Err(Error::ValueMismatch {
                    index,
                    expected: e,
                    found: f,
                    relative: self.relative,
                    absolute: self.absolute,
                });
            }
        }
    }
}

impl Default for Accuracy {
    fn default() -> Self {
        Accuracy::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_close() {
        let acc = Accuracy::new(1e-3, 1e-6);
        assert!(acc.is_close(1000.0, 1000.5));
        assert!(!acc.is_close(1000.0, 1002.0));
        assert!(acc.is_close(0.0, 5e-7));
        assert!(!acc.is_close(0.0, 5e-6));
        assert!(!acc.is_close(f64::NAN, f64::NAN));
    }

    #[test]
    fn test_compare_reports_index() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], (2, 2)).unwrap();
        let mut b = Tensor::zeros_sub((2, 2), 3);
        b.set_to(&a);
        assert!(Accuracy::STANDARD.compare(&a, &b).is_ok());

        b.set(&[1, 0], 3.1).unwrap();
        match Accuracy::STANDARD.compare(&a, &b) {
            Err(Error::ValueMismatch {
                index,
                expected,
                found,
                ..
            }) => {
                assert_eq!(index, vec![1, 0]);
                assert_eq!(expected, 3.0);
                assert_eq!(found, 3.1);
            }
            other => panic!("expected a value mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_compare_shape_mismatch() {
        let a = Tensor::zeros((2, 2));
        let b = Tensor::zeros(4);
        assert!(matches!(
            Accuracy::RELAXED.compare(&a, &b),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
