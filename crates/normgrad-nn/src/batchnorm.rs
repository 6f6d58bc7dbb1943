// BatchNorm: batch normalization over the mini-batch axis
//
// FORMULA (per feature position f of the per-sample shape, N = mini-batch):
//   mean[f] = (1/N) * sum_b x[b,f]
//   std[f]  = sqrt( (1/(N-1)) * sum_b (x[b,f] - mean[f])^2 + EPS )
//   xhat    = (x - mean[f]) / std[f]
//   y       = gamma[f] * xhat + beta[f]      (affine mode)
//   y       = xhat                           (otherwise)
//
// "Feature" here is every position of the per-sample shape, so a [N, 3, 4]
// input has 12 independent (mean, std) pairs. In affine mode the parameter
// tensor has shape input_shape ++ [2] and stores (gamma, beta) interleaved in
// feature order.
//
// ITERATION ORDER:
//   Every pass walks the batch axis in the outer loop and the per-sample
//   position in the inner loop, following each tensor's own offset and
//   strides. The order never changes between calls, so repeated forward
//   passes round identically.
//
// BACKWARD (g = dout * gamma, or g = dout without affine):
//   dx[b,f]    = ( g - mean_b(g) - xhat * sum_b(g * xhat) / (N-1) ) / std[f]
//   dgamma[f]  = sum_b dout * xhat
//   dbeta[f]   = sum_b dout
//   The N-1 comes from the unbiased variance used in forward.

use normgrad_core::{bail, Error, Result, Shape, Tensor, TEST_TOL_F64};

use crate::function::Function;

/// Default numerical stability constant added to the variance.
pub const DEFAULT_EPS: f64 = TEST_TOL_F64 * 0.1;

/// Configuration for a [`BatchNorm`] layer.
#[derive(Debug, Clone)]
pub struct BatchNormConfig {
    /// Whether learnable gamma/beta are applied after normalizing.
    pub affine: bool,
    /// Added to the unbiased variance before taking the square root.
    pub eps: f64,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            affine: true,
            eps: DEFAULT_EPS,
        }
    }
}

impl BatchNormConfig {
    pub fn affine(mut self, affine: bool) -> Self {
        self.affine = affine;
        self
    }

    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }
}

/// Batch normalization layer.
///
/// Normalizes every feature position of the per-sample shape across the
/// mini-batch and, in affine mode, rescales with learnable gamma/beta.
///
/// # Examples
/// ```ignore
/// let mut bn = BatchNorm::new(BatchNormConfig::default().affine(false));
/// bn.initialize(&Shape::from(5))?;
/// let mut y = Tensor::zeros(Shape::from(5).with_batch(8));
/// bn.forward(&x, &mut y)?; // x: [8, 5]
/// let var = bn.variance();  // [5]
/// ```
#[derive(Debug, Clone)]
pub struct BatchNorm {
    affine: bool,
    eps: f64,
    initialized: bool,
    input_shape: Shape,
    output_shape: Shape,
    parameter_shapes: Vec<Shape>,
    /// Per-feature mean of the last mini-batch.
    mean: Tensor,
    /// Per-feature sqrt(variance + eps) of the last mini-batch.
    std: Tensor,
    /// Normalized input, kept for the backward pass. Filled by forward in affine mode only.
    xhat: Tensor,
    /// Bound (gamma, beta) pairs, contiguous.
    params: Tensor,
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new(BatchNormConfig::default())
    }
}

impl BatchNorm {
    /// Create an uninitialized layer. Call [`Function::initialize`] before use.
    pub fn new(config: BatchNormConfig) -> Self {
        BatchNorm {
            affine: config.affine,
            eps: config.eps,
            initialized: false,
            input_shape: Shape::default(),
            output_shape: Shape::default(),
            parameter_shapes: Vec::new(),
            mean: Tensor::default(),
            std: Tensor::default(),
            xhat: Tensor::default(),
            params: Tensor::default(),
        }
    }

    /// Create a layer with the default EPS, with or without gamma/beta.
    pub fn with_affine(affine: bool) -> Self {
        Self::new(BatchNormConfig::default().affine(affine))
    }

    pub fn has_affine(&self) -> bool {
        self.affine
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Change EPS. Takes effect on the next forward pass.
    pub fn set_eps(&mut self, eps: f64) {
        self.eps = eps;
    }

    /// Copy of the bound (gamma, beta) tensor; empty without affine mode.
    pub fn parameters(&self) -> Vec<Tensor> {
        if self.affine && self.initialized {
            vec![self.params.clone()]
        } else {
            Vec::new()
        }
    }

    /// Copy of the per-feature mean computed by the last forward pass.
    pub fn mean(&self) -> Tensor {
        self.mean.clone()
    }

    /// Write the per-feature mean into `output`, reshaping it if needed.
    pub fn mean_into(&self, output: &mut Tensor) {
        output.set_to(&self.mean);
    }

    /// Per-feature unbiased variance of the last forward pass (`std^2 - EPS`).
    pub fn variance(&self) -> Tensor {
        let mut output = self.std.create_like();
        self.variance_into(&mut output);
        output
    }

    /// Write the per-feature variance into `output`, reshaping it if needed.
    pub fn variance_into(&self, output: &mut Tensor) {
        if output.shape() != self.std.shape() {
            output.reshape(self.std.shape().clone());
        }
        let positions = output.strided_indices();
        let out = output.storage_mut();
        for (o, &s) in positions.zip(self.std.storage()) {
            out[o] = s * s - self.eps;
        }
    }

    /// Check that `t` is `[N, per_sample..]` and return N.
    fn check_batch(&self, t: &Tensor, per_sample: &Shape) -> Result<usize> {
        if !self.initialized {
            return Err(Error::NotInitialized("BatchNorm"));
        }
        let n = t.dims().first().copied().unwrap_or(0);
        let expected = per_sample.with_batch(n);
        if t.rank() == 0 || *t.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: t.shape().clone(),
            });
        }
        Ok(n)
    }

    fn check_shape(t: &Tensor, expected: &Shape) -> Result<()> {
        if t.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected: expected.clone(),
                got: t.shape().clone(),
            });
        }
        Ok(())
    }

    /// Compute `mean` and `std` over the mini-batch of `input`.
    fn compute_statistics(&mut self, input: &Tensor, n: usize) {
        let d = self.input_shape.elem_count();
        let x = input.storage();

        self.mean.zero();
        self.std.zero();

        let mean = self.mean.storage_mut();
        for (i, f) in input.strided_indices().zip((0..d).cycle()) {
            mean[f] += x[i];
        }
        for m in mean.iter_mut() {
            *m /= n as f64;
        }

        let mean = self.mean.storage();
        let std = self.std.storage_mut();
        for (i, f) in input.strided_indices().zip((0..d).cycle()) {
            let diff = x[i] - mean[f];
            std[f] += diff * diff;
        }
        for s in std.iter_mut() {
            *s = (*s / (n - 1) as f64 + self.eps).sqrt();
        }
    }

    /// Multiply the cached `xhat` by gamma and add beta, writing into `output`.
    fn apply_gamma_beta(&self, output: &mut Tensor) {
        let d = self.input_shape.elem_count();
        let params = self.params.storage();
        let xhat = self.xhat.storage();
        let positions = output.strided_indices();
        let out = output.storage_mut();
        for ((o, f), &xh) in positions.zip((0..d).cycle()).zip(xhat) {
            out[o] = params[2 * f] * xh + params[2 * f + 1];
        }
    }
}

/// Write `(x - mean) / std` for every element of `input` into `dst`.
fn normalize(input: &Tensor, mean: &Tensor, std: &Tensor, dst: &mut Tensor) {
    let d = mean.elem_count();
    let x = input.storage();
    let (mean, std) = (mean.storage(), std.storage());
    let positions = dst.strided_indices();
    let out = dst.storage_mut();
    for ((i, o), f) in input.strided_indices().zip(positions).zip((0..d).cycle()) {
        out[o] = (x[i] - mean[f]) / std[f];
    }
}

impl Function for BatchNorm {
    fn initialize(&mut self, input_shape: &Shape) -> Result<()> {
        self.input_shape = input_shape.clone();
        self.output_shape = input_shape.clone();
        self.mean = Tensor::zeros(input_shape.clone());
        self.std = Tensor::zeros(input_shape.clone());
        self.xhat = Tensor::default();

        if self.affine {
            let param_shape = input_shape.append(2);
            // gamma = 1, beta = 0 until parameters are bound
            let mut params = Tensor::zeros(param_shape.clone());
            for pair in params.storage_mut().chunks_exact_mut(2) {
                pair[0] = 1.0;
            }
            self.params = params;
            self.parameter_shapes = vec![param_shape];
        } else {
            self.params = Tensor::default();
            self.parameter_shapes = Vec::new();
        }
        self.initialized = true;

        tracing::debug!(
            input_shape = %input_shape,
            affine = self.affine,
            eps = self.eps,
            "initialized batch norm"
        );
        Ok(())
    }

    fn set_parameters(&mut self, parameters: &[Tensor]) -> Result<()> {
        if !self.affine {
            if !parameters.is_empty() {
                bail!("there are no parameters since gamma and beta have been turned off");
            }
            return Ok(());
        }
        if parameters.len() != 1 {
            bail!(
                "expected exactly one (gamma, beta) tensor, got {}",
                parameters.len()
            );
        }
        if !self.initialized {
            return Err(Error::NotInitialized("BatchNorm"));
        }
        Self::check_shape(&parameters[0], &self.parameter_shapes[0])?;
        self.params.set_to(&parameters[0]);
        tracing::trace!(shape = %parameters[0].shape(), "bound batch norm parameters");
        Ok(())
    }

    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        let n = self.check_batch(input, &self.input_shape)?;
        Self::check_shape(output, &self.output_shape.with_batch(n))?;
        if n <= 1 {
            bail!("there must be more than 1 sample in the mini-batch, got {}", n);
        }
        tracing::trace!(shape = %input.shape(), affine = self.affine, "batch norm forward");

        self.compute_statistics(input, n);
        if self.affine {
            self.xhat.reshape(input.shape().clone());
            normalize(input, &self.mean, &self.std, &mut self.xhat);
            self.apply_gamma_beta(output);
        } else {
            // Without gamma/beta the output is xhat itself
            normalize(input, &self.mean, &self.std, output);
        }
        Ok(())
    }

    fn backwards(
        &mut self,
        input: &Tensor,
        dout: &Tensor,
        gradient_input: &mut Tensor,
        gradient_parameters: &mut [Tensor],
    ) -> Result<()> {
        let n = self.check_batch(input, &self.input_shape)?;
        Self::check_shape(dout, &self.output_shape.with_batch(n))?;
        Self::check_shape(gradient_input, input.shape())?;
        if n <= 1 {
            bail!("there must be more than 1 sample in the mini-batch, got {}", n);
        }
        if gradient_parameters.len() != self.parameter_shapes.len() {
            bail!(
                "expected {} parameter gradient tensors, got {}",
                self.parameter_shapes.len(),
                gradient_parameters.len()
            );
        }
        for (g, shape) in gradient_parameters.iter().zip(&self.parameter_shapes) {
            Self::check_shape(g, shape)?;
        }
        tracing::trace!(shape = %input.shape(), affine = self.affine, "batch norm backwards");

        // Statistics and xhat for exactly this input
        self.compute_statistics(input, n);
        self.xhat.reshape(input.shape().clone());
        normalize(input, &self.mean, &self.std, &mut self.xhat);

        let d = self.input_shape.elem_count();
        let params = self.params.storage();
        let gamma = |f: usize| if self.affine { params[2 * f] } else { 1.0 };
        let xhat = self.xhat.storage();
        let dy = dout.storage();

        // sums over the batch of dout and dout * xhat
        let mut sum_dout = vec![0.0; d];
        let mut sum_dout_xhat = vec![0.0; d];
        for ((i, f), &xh) in dout.strided_indices().zip((0..d).cycle()).zip(xhat) {
            sum_dout[f] += dy[i];
            sum_dout_xhat[f] += dy[i] * xh;
        }

        let std = self.std.storage();
        let nf = n as f64;
        let positions = gradient_input.strided_indices();
        let dx = gradient_input.storage_mut();
        for (((o, i), f), &xh) in positions
            .zip(dout.strided_indices())
            .zip((0..d).cycle())
            .zip(xhat)
        {
            let g = gamma(f);
            dx[o] = g * (dy[i] - sum_dout[f] / nf - xh * sum_dout_xhat[f] / (nf - 1.0)) / std[f];
        }

        if let Some(grad_params) = gradient_parameters.first_mut() {
            let positions = grad_params.strided_indices();
            let out = grad_params.storage_mut();
            for (k, o) in positions.enumerate() {
                let f = k / 2;
                out[o] = if k % 2 == 0 {
                    sum_dout_xhat[f]
                } else {
                    sum_dout[f]
                };
            }
        }
        Ok(())
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn parameter_shapes(&self) -> &[Shape] {
        &self.parameter_shapes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    fn forward(bn: &mut BatchNorm, x: &Tensor) -> Result<Tensor> {
        let mut y = Tensor::zeros(x.shape().clone());
        bn.forward(x, &mut y)?;
        Ok(y)
    }

    #[test]
    fn test_known_values() -> Result<()> {
        let mut bn = BatchNorm::with_affine(false);
        bn.initialize(&Shape::from(1))?;
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], (4, 1))?;
        let y = forward(&mut bn, &x)?;

        assert!(approx_eq(bn.mean().to_vec()[0], 2.5, 1e-12));
        // (2.25 + 0.25 + 0.25 + 2.25) / 3
        let var = 5.0 / 3.0;
        assert!(approx_eq(bn.variance().to_vec()[0], var, 1e-12));

        let std = (var + DEFAULT_EPS).sqrt();
        let expected = [-1.5 / std, -0.5 / std, 0.5 / std, 1.5 / std];
        for (got, want) in y.to_vec().iter().zip(expected) {
            assert!(approx_eq(*got, want, 1e-12), "{} vs {}", got, want);
        }
        assert!(approx_eq(y.to_vec()[0], -1.161895, 1e-6));
        Ok(())
    }

    #[test]
    fn test_minibatch_of_one_fails() -> Result<()> {
        let mut bn = BatchNorm::with_affine(false);
        bn.initialize(&Shape::from(3))?;
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], (1, 3))?;
        let mut y = Tensor::zeros((1, 3));
        assert!(matches!(
            bn.forward(&x, &mut y),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_minibatch_of_two() -> Result<()> {
        let mut bn = BatchNorm::with_affine(false);
        bn.initialize(&Shape::from(2))?;
        let x = Tensor::from_vec(vec![1.0, -1.0, 3.0, 5.0], (2, 2))?;
        let y = forward(&mut bn, &x)?;
        assert!(y.to_vec().iter().all(|v| v.is_finite()));
        assert_eq!(bn.mean().to_vec(), vec![2.0, 2.0]);
        // unbiased: (1 + 1) / 1 and (9 + 9) / 1
        let var = bn.variance().to_vec();
        assert!(approx_eq(var[0], 2.0, 1e-12));
        assert!(approx_eq(var[1], 18.0, 1e-12));
        Ok(())
    }

    #[test]
    fn test_output_is_standardized() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut bn = BatchNorm::with_affine(false);
        bn.initialize(&Shape::from((3, 4)))?;
        let n = 6;
        let x = Tensor::rand((n, 3, 4), &mut rng);
        let y = forward(&mut bn, &x)?.to_vec();

        for f in 0..12 {
            let col: Vec<f64> = (0..n).map(|b| y[b * 12 + f]).collect();
            let mean = col.iter().sum::<f64>() / n as f64;
            let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1) as f64;
            assert!(approx_eq(mean, 0.0, 1e-12), "feature {} mean {}", f, mean);
            assert!(approx_eq(var, 1.0, 1e-6), "feature {} var {}", f, var);
        }
        Ok(())
    }

    #[test]
    fn test_variance_plus_eps_is_std_squared() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut bn = BatchNorm::new(BatchNormConfig::default().affine(false).eps(1e-3));
        bn.initialize(&Shape::from(5))?;
        let x = Tensor::rand((4, 5), &mut rng);
        let y = forward(&mut bn, &x)?;

        let var = bn.variance();
        let mut var_sub = Tensor::zeros_sub(1, 3);
        bn.variance_into(&mut var_sub);
        assert_eq!(var_sub.to_vec(), var.to_vec());

        // y = (x - mean) / std, so std can be recovered from any non-constant column
        let (xs, ys, means) = (x.to_vec(), y.to_vec(), bn.mean().to_vec());
        for f in 0..5 {
            let std = (xs[f] - means[f]) / ys[f];
            assert!(approx_eq(var.to_vec()[f] + bn.eps(), std * std, 1e-10));
        }
        Ok(())
    }

    #[test]
    fn test_set_eps_after_initialize() -> Result<()> {
        let mut bn = BatchNorm::with_affine(false);
        bn.initialize(&Shape::from(2))?;
        bn.set_eps(1e-2);
        assert_eq!(bn.eps(), 1e-2);

        let x = Tensor::from_vec(vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0], (4, 2))?;
        let y = forward(&mut bn, &x)?;

        let var_u: [f64; 2] = [5.0 / 3.0, 500.0 / 3.0];
        let var = bn.variance().to_vec();
        let (xs, ys, means) = (x.to_vec(), y.to_vec(), bn.mean().to_vec());
        for f in 0..2 {
            let std = (xs[f] - means[f]) / ys[f];
            assert!(approx_eq(std, (var_u[f] + 1e-2).sqrt(), 1e-10));
            assert!(approx_eq(var[f] + bn.eps(), std * std, 1e-10));
            assert!(approx_eq(var[f], var_u[f], 1e-10));
        }
        Ok(())
    }

    #[test]
    fn test_affine_flag_and_bound_parameters() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(5);

        let mut plain = BatchNorm::with_affine(false);
        assert!(!plain.has_affine());
        plain.initialize(&Shape::from((2, 3)))?;
        plain.set_parameters(&[])?;
        assert!(plain.parameters().is_empty());

        let mut bn = BatchNorm::with_affine(true);
        assert!(bn.has_affine());
        assert!(bn.parameters().is_empty());
        bn.initialize(&Shape::from((2, 3)))?;
        let bound = Tensor::rand_sub((2, 3, 2), &mut rng);
        bn.set_parameters(std::slice::from_ref(&bound))?;

        let params = bn.parameters();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].dims(), &[2, 3, 2]);
        assert_eq!(params[0].to_vec(), bound.to_vec());
        Ok(())
    }

    #[test]
    fn test_forward_is_deterministic() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(5);
        let mut bn = BatchNorm::with_affine(true);
        bn.initialize(&Shape::from((3, 4)))?;
        bn.set_parameters(&[Tensor::rand((3, 4, 2), &mut rng)])?;
        let x = Tensor::rand((5, 3, 4), &mut rng);

        let y1 = forward(&mut bn, &x)?;
        let (m1, v1) = (bn.mean(), bn.variance());
        let y2 = forward(&mut bn, &x)?;
        assert_eq!(y1, y2);
        assert_eq!(m1, bn.mean());
        assert_eq!(v1, bn.variance());
        Ok(())
    }

    #[test]
    fn test_identity_affine_matches_plain() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(9);
        let x = Tensor::rand((4, 5), &mut rng);

        let mut plain = BatchNorm::with_affine(false);
        plain.initialize(&Shape::from(5))?;
        let expected = forward(&mut plain, &x)?;

        let mut affine = BatchNorm::with_affine(true);
        affine.initialize(&Shape::from(5))?;
        let mut params = Tensor::zeros((5, 2));
        for f in 0..5 {
            params.set(&[f, 0], 1.0)?;
        }
        affine.set_parameters(&[params])?;
        let found = forward(&mut affine, &x)?;
        assert_eq!(expected.to_vec(), found.to_vec());
        Ok(())
    }

    #[test]
    fn test_gamma_beta_interleaved() -> Result<()> {
        let mut bn = BatchNorm::with_affine(true);
        bn.initialize(&Shape::from(2))?;
        // feature 0: gamma 2, beta 1; feature 1: gamma -1, beta 0.5
        bn.set_parameters(&[Tensor::from_vec(vec![2.0, 1.0, -1.0, 0.5], (2, 2))?])?;
        let x = Tensor::from_vec(vec![0.0, 10.0, 2.0, 20.0], (2, 2))?;
        let y = forward(&mut bn, &x)?.to_vec();
        // column 0: deviations -1, 1 with std sqrt(2 + eps); column 1: -5, 5 with std sqrt(50 + eps)
        let xh0 = -1.0 / (2.0 + DEFAULT_EPS).sqrt();
        let xh1 = -5.0 / (50.0 + DEFAULT_EPS).sqrt();
        assert!(approx_eq(y[0], 2.0 * xh0 + 1.0, 1e-12));
        assert!(approx_eq(y[1], -xh1 + 0.5, 1e-12));
        assert!(approx_eq(y[2], -2.0 * xh0 + 1.0, 1e-12));
        assert!(approx_eq(y[3], xh1 + 0.5, 1e-12));
        Ok(())
    }

    #[test]
    fn test_respects_offsets_and_strides() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(13);
        let mut bn = BatchNorm::with_affine(true);
        bn.initialize(&Shape::from(3))?;
        bn.set_parameters(&[Tensor::rand_sub((3, 2), &mut rng)])?;

        let x = Tensor::rand((4, 3), &mut rng);
        let expected = forward(&mut bn, &x)?;

        // same values inside a wider, offset buffer
        let mut x_view = Tensor::zeros((4, 7)).narrow(1, 2, 3)?;
        x_view.set_to(&x);
        let mut y_view = Tensor::zeros_sub((4, 3), 5);
        bn.forward(&x_view, &mut y_view)?;
        assert_eq!(expected.to_vec(), y_view.to_vec());
        assert!(y_view.storage()[..5].iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn test_set_parameters_contract() -> Result<()> {
        let mut plain = BatchNorm::with_affine(false);
        plain.initialize(&Shape::from(3))?;
        assert!(plain.set_parameters(&[]).is_ok());
        assert!(matches!(
            plain.set_parameters(&[Tensor::zeros((3, 2))]),
            Err(Error::InvalidArgument(_))
        ));

        let mut affine = BatchNorm::with_affine(true);
        affine.initialize(&Shape::from(3))?;
        assert_eq!(affine.parameter_shapes(), &[Shape::from((3, 2))]);
        assert!(matches!(
            affine.set_parameters(&[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            affine.set_parameters(&[Tensor::zeros((3, 2)), Tensor::zeros((3, 2))]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            affine.set_parameters(&[Tensor::zeros((2, 2))]),
            Err(Error::ShapeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_reinitialize_reallocates() -> Result<()> {
        let mut bn = BatchNorm::with_affine(true);
        bn.initialize(&Shape::from(5))?;
        assert_eq!(bn.mean().dims(), &[5]);
        bn.initialize(&Shape::from((3, 4)))?;
        assert_eq!(bn.mean().dims(), &[3, 4]);
        assert_eq!(bn.variance().dims(), &[3, 4]);
        assert_eq!(bn.parameter_shapes(), &[Shape::from((3, 4, 2))]);
        assert_eq!(bn.output_shape(), &Shape::from((3, 4)));
        assert_eq!(bn.num_parameters(), 24);

        let mut rng = StdRng::seed_from_u64(1);
        let x = Tensor::rand((3, 3, 4), &mut rng);
        forward(&mut bn, &x)?;
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_shapes() -> Result<()> {
        let mut bn = BatchNorm::with_affine(false);
        let x = Tensor::zeros((4, 5));
        let mut y = Tensor::zeros((4, 5));
        assert!(matches!(
            bn.forward(&x, &mut y),
            Err(Error::NotInitialized(_))
        ));

        bn.initialize(&Shape::from(5))?;
        let mut bad = Tensor::zeros((4, 6));
        assert!(matches!(
            bn.forward(&x, &mut bad),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            bn.forward(&Tensor::zeros((4, 3)), &mut y),
            Err(Error::ShapeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_backwards_gradient_sums() -> Result<()> {
        // sum of input gradients over the batch is zero for every feature,
        // since shifting a whole column does not change the output
        let mut rng = StdRng::seed_from_u64(21);
        let mut bn = BatchNorm::with_affine(true);
        bn.initialize(&Shape::from(4))?;
        bn.set_parameters(&[Tensor::rand((4, 2), &mut rng)])?;
        let x = Tensor::rand((5, 4), &mut rng);
        let dout = Tensor::rand((5, 4), &mut rng);

        let mut dx = Tensor::zeros((5, 4));
        let mut dparams = [Tensor::zeros((4, 2))];
        bn.backwards(&x, &dout, &mut dx, &mut dparams)?;

        let dx = dx.to_vec();
        for f in 0..4 {
            let s: f64 = (0..5).map(|b| dx[b * 4 + f]).sum();
            assert!(approx_eq(s, 0.0, 1e-10), "feature {} sum {}", f, s);
        }
        // dbeta is the column sum of dout
        let dy = dout.to_vec();
        let dbeta: f64 = (0..5).map(|b| dy[b * 4]).sum();
        assert!(approx_eq(dparams[0].get(&[0, 1])?, dbeta, 1e-12));
        Ok(())
    }

    #[test]
    fn test_backwards_parameter_arity() -> Result<()> {
        let mut bn = BatchNorm::with_affine(true);
        bn.initialize(&Shape::from(2))?;
        let x = Tensor::from_vec(vec![0.0, 1.0, 2.0, 3.0], (2, 2))?;
        let mut dx = Tensor::zeros((2, 2));
        assert!(matches!(
            bn.backwards(&x, &x, &mut dx, &mut []),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }
}
