use rand::Rng;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::{Layout, StridedIter};
use crate::shape::Shape;

// Tensor: a flat f64 buffer plus a Layout
//
// The buffer is owned. A "sub-tensor view" is a tensor whose layout begins at
// a non-zero offset (and possibly leaves gaps between rows) inside a larger
// buffer; the elements outside the layout are never read or written by any
// operation here.
//
// Invariant: every flat index produced by `layout.strided_indices()` is
// inside `data`. Constructors check it; `reshape` grows the buffer to keep it.

/// An n-dimensional array of `f64` stored as a flat buffer with an explicit layout.
///
/// # Example
/// ```
/// use normgrad_core::Tensor;
///
/// let mut t = Tensor::zeros_sub((2, 3), 4);
/// t.set(&[1, 2], 5.0)?;
/// assert_eq!(t.offset(), 4);
/// assert_eq!(t.to_vec(), vec![0.0, 0.0, 0.0, 0.0, 0.0, 5.0]);
/// # Ok::<(), normgrad_core::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f64>,
    layout: Layout,
}

impl Default for Tensor {
    /// An empty rank-1 tensor with no elements.
    fn default() -> Self {
        Tensor::zeros(0)
    }
}

impl Tensor {
    // Constructors

    /// Contiguous tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Contiguous tensor filled with `value`.
    pub fn full(shape: impl Into<Shape>, value: f64) -> Self {
        let shape = shape.into();
        Tensor {
            data: vec![value; shape.elem_count()],
            layout: Layout::contiguous(shape),
        }
    }

    /// Contiguous tensor from row-major values.
    pub fn from_vec(data: Vec<f64>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        Ok(Tensor {
            data,
            layout: Layout::contiguous(shape),
        })
    }

    /// Tensor over an existing buffer with an explicit layout.
    pub fn from_parts(data: Vec<f64>, layout: Layout) -> Result<Self> {
        if let Some(required) = layout.max_flat_index() {
            if required >= data.len() {
                return Err(Error::BufferTooSmall {
                    required,
                    len: data.len(),
                });
            }
        }
        Ok(Tensor { data, layout })
    }

    /// Zero tensor laid out contiguously at `offset` inside a larger buffer.
    pub fn zeros_sub(shape: impl Into<Shape>, offset: usize) -> Self {
        let shape = shape.into();
        Tensor {
            data: vec![0.0; offset + shape.elem_count()],
            layout: Layout::contiguous_at(shape, offset),
        }
    }

    /// Contiguous tensor with values drawn uniformly from `[-1, 1)`.
    pub fn rand<R: Rng>(shape: impl Into<Shape>, rng: &mut R) -> Self {
        let shape = shape.into();
        let data = (0..shape.elem_count())
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        Tensor {
            data,
            layout: Layout::contiguous(shape),
        }
    }

    /// Random tensor that is a sub-tensor view of a larger random buffer.
    ///
    /// The view starts at a random non-zero offset and is followed by a few
    /// padding elements, so code that ignores the offset reads the wrong values.
    pub fn rand_sub<R: Rng>(shape: impl Into<Shape>, rng: &mut R) -> Self {
        let shape = shape.into();
        let offset = rng.gen_range(1..=8);
        let padding = rng.gen_range(1..=8);
        let data = (0..offset + shape.elem_count() + padding)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        Tensor {
            data,
            layout: Layout::contiguous_at(shape, offset),
        }
    }

    /// Random tensor, as a sub-tensor view when `sub` is true.
    pub fn random<R: Rng>(rng: &mut R, sub: bool, shape: impl Into<Shape>) -> Self {
        if sub {
            Self::rand_sub(shape, rng)
        } else {
            Self::rand(shape, rng)
        }
    }

    /// Narrow along `dim`, keeping the same buffer. The result is usually non-contiguous.
    pub fn narrow(self, dim: usize, start: usize, len: usize) -> Result<Tensor> {
        let layout = self.layout.narrow(dim, start, len)?;
        Ok(Tensor {
            data: self.data,
            layout,
        })
    }

    /// New contiguous zero tensor with the same shape.
    pub fn create_like(&self) -> Tensor {
        Tensor::zeros(self.shape().clone())
    }

    // Accessors

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.layout.elem_count()
    }

    /// Index into the buffer of the first logical element.
    pub fn offset(&self) -> usize {
        self.layout.offset()
    }

    /// Always `DType::F64`.
    pub fn dtype(&self) -> DType {
        DType::F64
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Size of dimension `dim`.
    pub fn length(&self, dim: usize) -> Result<usize> {
        self.shape().dim(dim)
    }

    /// The whole flat buffer, including elements outside this tensor's layout.
    pub fn storage(&self) -> &[f64] {
        &self.data
    }

    /// Mutable access to the whole flat buffer.
    pub fn storage_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Flat buffer indices of every logical element, in row-major order.
    pub fn strided_indices(&self) -> StridedIter {
        self.layout.strided_indices()
    }

    /// Element at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        Ok(self.data[self.layout.flat_index(index)?])
    }

    /// Overwrite the element at a multi-dimensional index.
    pub fn set(&mut self, index: &[usize], value: f64) -> Result<()> {
        let flat = self.layout.flat_index(index)?;
        self.data[flat] = value;
        Ok(())
    }

    /// Values in logical row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.strided_indices().map(|i| self.data[i]).collect()
    }

    // In-place operations

    /// Change the shape. The tensor becomes contiguous at its current offset
    /// and the buffer grows if needed. Element values are unspecified afterwards
    /// unless the shape and layout were already the requested ones.
    pub fn reshape(&mut self, shape: impl Into<Shape>) {
        let shape = shape.into();
        if *self.shape() == shape && self.is_contiguous() {
            return;
        }
        let offset = self.offset();
        let required = offset + shape.elem_count();
        if self.data.len() < required {
            self.data.resize(required, 0.0);
        }
        self.layout = Layout::contiguous_at(shape, offset);
    }

    /// Set every element of this tensor (not the rest of the buffer) to zero.
    pub fn zero(&mut self) {
        self.fill(0.0);
    }

    /// Set every element of this tensor to `value`.
    pub fn fill(&mut self, value: f64) {
        for i in self.layout.strided_indices() {
            self.data[i] = value;
        }
    }

    /// Copy `src` into this tensor, taking its shape.
    pub fn set_to(&mut self, src: &Tensor) {
        if self.shape() != src.shape() {
            self.reshape(src.shape().clone());
        }
        for (dst, s) in self.layout.strided_indices().zip(src.strided_indices()) {
            self.data[dst] = src.data[s];
        }
    }

    /// Sum of the element-wise product with `other` (which must have the same shape).
    pub fn dot(&self, other: &Tensor) -> Result<f64> {
        if self.shape() != other.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: other.shape().clone(),
            });
        }
        Ok(self
            .strided_indices()
            .zip(other.strided_indices())
            .map(|(a, b)| self.data[a] * other.data[b])
            .sum())
    }
}
