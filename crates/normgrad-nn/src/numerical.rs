// NumericalGradient: finite-difference gradients of any Function
//
// The loss is implied by the upstream gradient:
//
//   loss = sum(output * dout)
//
// so d(loss)/d(output) == dout, which is exactly what an analytic
// `backwards(input, dout, ..)` propagates. For every element x of the input
// and of every parameter tensor:
//
//   loss_plus  = loss with x + h
//   loss_minus = loss with x - h
//   grad       = (loss_plus - loss_minus) / (2h)
//
// The forward pass is re-run in full for each evaluation. A layer like batch
// norm recomputes its statistics from the whole mini-batch, so nudging one
// element moves every output in its column; the loss is therefore always
// summed over the entire output tensor.
//
// Cost is two forward passes per element. This is a verification tool, not a
// training path.

use rayon::prelude::*;

use normgrad_core::{bail, Error, Result, Shape, Tensor};

use crate::function::Function;

/// Default finite-difference step.
pub const DEFAULT_STEP: f64 = 1e-5;

/// Which tensor an element belongs to.
#[derive(Debug, Clone, Copy)]
enum Target {
    Input,
    Parameter(usize),
}

fn element<'a>(
    input: &'a mut Tensor,
    parameters: &'a mut [Tensor],
    target: Target,
    flat: usize,
) -> &'a mut f64 {
    match target {
        Target::Input => &mut input.storage_mut()[flat],
        Target::Parameter(k) => &mut parameters[k].storage_mut()[flat],
    }
}

/// `sum(output * dout)` after a full forward pass.
fn loss<F: Function + ?Sized>(
    function: &mut F,
    input: &Tensor,
    parameters: &[Tensor],
    dout: &Tensor,
    output: &mut Tensor,
) -> Result<f64> {
    function.set_parameters(parameters)?;
    function.forward(input, output)?;
    output.dot(dout)
}

/// Central-difference gradient estimator.
///
/// # Example
/// ```ignore
/// let numeric = NumericalGradient::default();
/// numeric.differentiate(&mut bn, &mut x, &mut params, &dout, &mut dx, &mut dparams)?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NumericalGradient {
    step: f64,
}

impl Default for NumericalGradient {
    fn default() -> Self {
        Self { step: DEFAULT_STEP }
    }
}

impl NumericalGradient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `step` as the finite-difference step `h`.
    pub fn with_step(step: f64) -> Self {
        Self { step }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Estimate the gradient of `sum(output * dout)` with respect to `input`
    /// and every tensor in `parameters`.
    ///
    /// `function` must already be initialized for `input`'s per-sample shape.
    /// Each element is perturbed in place and restored to its exact original
    /// value afterwards, and a last forward pass on the restored tensors
    /// leaves any cached layer state as it would be after a plain forward.
    /// Results are written into `gradient_input` and
    /// `gradient_parameters`, which must be shaped like their targets (their
    /// layouts may differ). Any forward failure is returned as-is.
    pub fn differentiate<F: Function + ?Sized>(
        &self,
        function: &mut F,
        input: &mut Tensor,
        parameters: &mut [Tensor],
        dout: &Tensor,
        gradient_input: &mut Tensor,
        gradient_parameters: &mut [Tensor],
    ) -> Result<()> {
        let output_shape =
            Self::validate(&*function, input, parameters, dout, gradient_input, gradient_parameters)?;
        let mut output = Tensor::zeros(output_shape);

        tracing::debug!(
            elements = input.elem_count(),
            parameters = parameters.len(),
            step = self.step,
            "numerical gradient"
        );

        let positions = input.strided_indices();
        for (i, g) in positions.zip(gradient_input.strided_indices()) {
            let estimate = self.partial(
                function,
                input,
                parameters,
                dout,
                &mut output,
                Target::Input,
                i,
            )?;
            gradient_input.storage_mut()[g] = estimate;
        }

        for (k, gradient) in gradient_parameters.iter_mut().enumerate() {
            tracing::trace!(parameter = k, shape = %parameters[k].shape(), "numerical gradient of parameter");
            let positions = parameters[k].strided_indices();
            for (i, g) in positions.zip(gradient.strided_indices()) {
                let estimate = self.partial(
                    function,
                    input,
                    parameters,
                    dout,
                    &mut output,
                    Target::Parameter(k),
                    i,
                )?;
                gradient.storage_mut()[g] = estimate;
            }
        }

        // leave the layer's parameters and statistics at the unperturbed point
        function.set_parameters(parameters)?;
        function.forward(input, &mut output)
    }

    /// Same as [`differentiate`](Self::differentiate), with the per-element
    /// cycles spread over the rayon pool.
    ///
    /// Every worker gets its own clone of the layer, input and parameters, so
    /// no scratch state is shared. The estimates are bit-identical to the
    /// sequential ones.
    pub fn differentiate_parallel<F>(
        &self,
        function: &F,
        input: &Tensor,
        parameters: &[Tensor],
        dout: &Tensor,
        gradient_input: &mut Tensor,
        gradient_parameters: &mut [Tensor],
    ) -> Result<()>
    where
        F: Function + Clone + Send + Sync,
    {
        let output_shape =
            Self::validate(function, input, parameters, dout, gradient_input, gradient_parameters)?;

        tracing::debug!(
            elements = input.elem_count(),
            parameters = parameters.len(),
            step = self.step,
            threads = rayon::current_num_threads(),
            "parallel numerical gradient"
        );

        let estimates = self.estimate_parallel(
            function,
            input,
            parameters,
            dout,
            &output_shape,
            Target::Input,
        )?;
        write_logical(gradient_input, &estimates);

        for (k, gradient) in gradient_parameters.iter_mut().enumerate() {
            let estimates = self.estimate_parallel(
                function,
                input,
                parameters,
                dout,
                &output_shape,
                Target::Parameter(k),
            )?;
            write_logical(gradient, &estimates);
        }
        Ok(())
    }

    fn estimate_parallel<F>(
        &self,
        function: &F,
        input: &Tensor,
        parameters: &[Tensor],
        dout: &Tensor,
        output_shape: &Shape,
        target: Target,
    ) -> Result<Vec<f64>>
    where
        F: Function + Clone + Send + Sync,
    {
        let flats: Vec<usize> = match target {
            Target::Input => input.strided_indices().collect(),
            Target::Parameter(k) => parameters[k].strided_indices().collect(),
        };
        flats
            .par_iter()
            .map_init(
                || {
                    (
                        function.clone(),
                        input.clone(),
                        parameters.to_vec(),
                        Tensor::zeros(output_shape.clone()),
                    )
                },
                |(function, input, parameters, output), &i| {
                    self.partial(function, input, parameters, dout, output, target, i)
                },
            )
            .collect()
    }

    /// Central difference for the element at flat index `i` of `target`.
    #[allow(clippy::too_many_arguments)]
    fn partial<F: Function + ?Sized>(
        &self,
        function: &mut F,
        input: &mut Tensor,
        parameters: &mut [Tensor],
        dout: &Tensor,
        output: &mut Tensor,
        target: Target,
        i: usize,
    ) -> Result<f64> {
        let h = self.step;
        let saved = *element(input, parameters, target, i);

        *element(input, parameters, target, i) = saved + h;
        let plus = loss(function, input, parameters, dout, output);

        let minus = if plus.is_ok() {
            *element(input, parameters, target, i) = saved - h;
            loss(function, input, parameters, dout, output)
        } else {
            Ok(0.0)
        };

        *element(input, parameters, target, i) = saved;
        Ok((plus? - minus?) / (2.0 * h))
    }

    /// Check every tensor against the layer's shapes and return the output shape.
    fn validate<F: Function + ?Sized>(
        function: &F,
        input: &Tensor,
        parameters: &[Tensor],
        dout: &Tensor,
        gradient_input: &Tensor,
        gradient_parameters: &[Tensor],
    ) -> Result<Shape> {
        if function.tensor_type() != input.dtype() {
            return Err(Error::DTypeMismatch {
                expected: function.tensor_type(),
                got: input.dtype(),
            });
        }
        let minibatch = input.length(0)?;
        let output_shape = function.output_shape().with_batch(minibatch);
        same_shape(dout.shape(), &output_shape)?;
        same_shape(gradient_input.shape(), input.shape())?;
        if gradient_parameters.len() != parameters.len() {
            bail!(
                "{} parameter tensors but {} gradient tensors",
                parameters.len(),
                gradient_parameters.len()
            );
        }
        for (g, p) in gradient_parameters.iter().zip(parameters) {
            same_shape(g.shape(), p.shape())?;
        }
        Ok(output_shape)
    }
}

fn same_shape(got: &Shape, expected: &Shape) -> Result<()> {
    if got != expected {
        return Err(Error::ShapeMismatch {
            expected: expected.clone(),
            got: got.clone(),
        });
    }
    Ok(())
}

/// Write `values` (logical order) into `dst`.
fn write_logical(dst: &mut Tensor, values: &[f64]) {
    let positions = dst.strided_indices();
    let out = dst.storage_mut();
    for (o, &v) in positions.zip(values) {
        out[o] = v;
    }
}
