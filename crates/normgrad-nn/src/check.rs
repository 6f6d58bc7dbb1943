// GradientCheck: analytic backward pass vs. finite differences
//
// For every test case, once with ordinary tensors and once with sub-tensor
// views (tensors that start at an offset inside a larger buffer):
//
//   1. random input [minibatch, input_shape..], initialize the layer
//   2. random parameters and random upstream gradient dout
//   3. NumericalGradient estimates d(sum(output * dout)) / d(input, params)
//   4. forward, then the layer's own backwards
//   5. compare the two within the configured Accuracy
//
// Gradient buffers are pre-filled with random values so a backward pass that
// forgets to write an element cannot pass by accident.

use rand::rngs::StdRng;
use rand::SeedableRng;

use normgrad_core::{Accuracy, Result, Shape, Tensor};

use crate::function::Function;
use crate::numerical::NumericalGradient;

/// One input configuration to check.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientCase {
    /// Per-sample input shape given to `initialize`.
    pub input_shape: Shape,
    /// Mini-batch size (dimension 0 of the tensors).
    pub minibatch: usize,
}

impl GradientCase {
    pub fn new(input_shape: impl Into<Shape>, minibatch: usize) -> Self {
        Self {
            input_shape: input_shape.into(),
            minibatch,
        }
    }
}

/// Random parameter tensors for the given shapes, as sub-tensor views when `sub`.
pub fn random_parameters(shapes: &[Shape], rng: &mut StdRng, sub: bool) -> Vec<Tensor> {
    shapes
        .iter()
        .map(|s| Tensor::random(rng, sub, s.clone()))
        .collect()
}

/// Configuration and driver for checking a layer's backward pass.
#[derive(Debug, Clone)]
pub struct GradientCheck {
    /// Allowed difference between the analytic and numerical gradients.
    pub tolerance: Accuracy,
    /// Seed for every random tensor the check creates.
    pub seed: u64,
    /// Finite-difference estimator used as ground truth.
    pub numeric: NumericalGradient,
}

impl Default for GradientCheck {
    fn default() -> Self {
        Self {
            tolerance: Accuracy::RELAXED,
            seed: 234,
            numeric: NumericalGradient::default(),
        }
    }
}

impl GradientCheck {
    pub fn tolerance(mut self, tolerance: Accuracy) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        self.numeric = NumericalGradient::with_step(step);
        self
    }

    /// Check `function` on every case with uniformly random parameters.
    pub fn run<F: Function + ?Sized>(&self, function: &mut F, cases: &[GradientCase]) -> Result<()> {
        self.run_with(function, cases, random_parameters)
    }

    /// Check `function` on every case, creating parameters with `make_parameters`.
    ///
    /// The first mismatch is returned as `Error::ValueMismatch` (or
    /// `ShapeMismatch` if the backward pass produced the wrong shape).
    pub fn run_with<F, P>(
        &self,
        function: &mut F,
        cases: &[GradientCase],
        mut make_parameters: P,
    ) -> Result<()>
    where
        F: Function + ?Sized,
        P: FnMut(&[Shape], &mut StdRng, bool) -> Vec<Tensor>,
    {
        let mut rng = StdRng::seed_from_u64(self.seed);

        for sub in [false, true] {
            for case in cases {
                let input_shape = case.input_shape.with_batch(case.minibatch);
                let mut input = Tensor::random(&mut rng, sub, input_shape.clone());

                function.initialize(&case.input_shape)?;
                let mut parameters = make_parameters(function.parameter_shapes(), &mut rng, sub);

                let output_shape = function.output_shape().with_batch(case.minibatch);
                let dout = Tensor::random(&mut rng, sub, output_shape.clone());

                let mut expected_dx = Tensor::random(&mut rng, sub, input_shape.clone());
                let mut expected_dw = random_parameters(function.parameter_shapes(), &mut rng, sub);
                self.numeric.differentiate(
                    function,
                    &mut input,
                    &mut parameters,
                    &dout,
                    &mut expected_dx,
                    &mut expected_dw,
                )?;

                // some layers need forward before backwards
                function.set_parameters(&parameters)?;
                let mut output = Tensor::random(&mut rng, sub, output_shape);
                function.forward(&input, &mut output)?;

                let mut found_dx = Tensor::random(&mut rng, sub, input_shape);
                let mut found_dw = random_parameters(function.parameter_shapes(), &mut rng, sub);
                function.backwards(&input, &dout, &mut found_dx, &mut found_dw)?;

                let compared = self.tolerance.compare(&expected_dx, &found_dx).and_then(|_| {
                    expected_dw
                        .iter()
                        .zip(&found_dw)
                        .try_for_each(|(e, f)| self.tolerance.compare(e, f))
                });
                if let Err(e) = compared {
                    tracing::warn!(
                        sub,
                        input_shape = %case.input_shape,
                        minibatch = case.minibatch,
                        error = %e,
                        "analytic gradient disagrees with numerical gradient"
                    );
                    return Err(e);
                }
                tracing::debug!(
                    sub,
                    input_shape = %case.input_shape,
                    minibatch = case.minibatch,
                    "gradient case passed"
                );
            }
        }
        Ok(())
    }
}
