// Function: the contract every differentiable layer implements
//
// A layer is set up once per input shape with `initialize`, bound to its
// learnable parameters with `set_parameters`, and then evaluated with
// `forward` / `backwards` on mini-batches. Dimension 0 of every tensor handed
// to forward/backwards is the mini-batch axis; the shapes reported by the
// layer exclude it.
//
// Layers own their scratch state (statistics, caches) and mutate it on every
// call, hence `&mut self`. There is no shared base state: each layer type
// implements the whole trait.

use normgrad_core::{DType, Result, Shape, Tensor};

/// A layer with a forward pass and an analytic backward pass.
///
/// The numerical gradient checker only relies on `initialize`,
/// `set_parameters`, `forward`, and the shape accessors, so it can verify
/// any implementation of `backwards`.
///
/// # Example
/// ```ignore
/// let mut bn = BatchNorm::with_affine(false);
/// bn.initialize(&Shape::from(5))?;
/// bn.set_parameters(&[])?;
/// let mut out = Tensor::zeros(bn.output_shape().with_batch(8));
/// bn.forward(&input, &mut out)?;
/// ```
pub trait Function {
    /// Prepare the layer for inputs whose per-sample shape is `input_shape`.
    ///
    /// Calling it again with a different shape reallocates all internal state.
    fn initialize(&mut self, input_shape: &Shape) -> Result<()>;

    /// Bind the learnable parameters, one tensor per entry of `parameter_shapes()`.
    fn set_parameters(&mut self, parameters: &[Tensor]) -> Result<()>;

    /// Compute `output` from `input`. Both carry the mini-batch axis.
    fn forward(&mut self, input: &Tensor, output: &mut Tensor) -> Result<()>;

    /// Propagate `dout` (the gradient of the loss w.r.t. the output) back to
    /// the input and the parameters.
    ///
    /// `gradient_input` has the input's shape; `gradient_parameters` has one
    /// tensor per parameter, shaped like it. Both are overwritten.
    fn backwards(
        &mut self,
        input: &Tensor,
        dout: &Tensor,
        gradient_input: &mut Tensor,
        gradient_parameters: &mut [Tensor],
    ) -> Result<()>;

    /// Per-sample input shape given to `initialize`.
    fn input_shape(&self) -> &Shape;

    /// Per-sample output shape.
    fn output_shape(&self) -> &Shape;

    /// Shapes of the tensors `set_parameters` expects, in order.
    fn parameter_shapes(&self) -> &[Shape];

    /// Element type of the tensors this layer operates on.
    fn tensor_type(&self) -> DType {
        DType::F64
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameter_shapes().iter().map(|s| s.elem_count()).sum()
    }
}
