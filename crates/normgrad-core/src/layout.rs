use crate::error::{Error, Result};
use crate::shape::Shape;

// Layout: how a tensor's logical shape maps onto its flat buffer
//
// flat_index(i0, i1, ..) = offset + i0 * strides[0] + i1 * strides[1] + ..
//
// The offset is what lets a tensor live somewhere in the middle of a larger
// buffer (a sub-tensor view). Layers never assume offset 0 or contiguous
// strides; they walk `strided_indices()`, which visits every logical element
// in row-major order. With the batch axis first, that order is "batch outer,
// per-sample position inner", the fixed order the statistics passes rely on.

/// Layout describes how a tensor's logical shape maps to flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    /// Index into the buffer of the element at logical position [0, 0, ..].
    offset: usize,
}

impl Layout {
    /// Contiguous row-major layout starting at the beginning of the buffer.
    pub fn contiguous(shape: Shape) -> Self {
        Self::contiguous_at(shape, 0)
    }

    /// Contiguous row-major layout starting at `offset`.
    pub fn contiguous_at(shape: Shape, offset: usize) -> Self {
        let strides = shape.stride_contiguous();
        Layout {
            shape,
            strides,
            offset,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// True if the strides are row-major and leave no gaps. The offset may be non-zero.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.stride_contiguous()
    }

    /// Largest flat index this layout touches, or `None` for an empty shape.
    pub fn max_flat_index(&self) -> Option<usize> {
        if self.elem_count() == 0 {
            return None;
        }
        let span: usize = self
            .dims()
            .iter()
            .zip(&self.strides)
            .map(|(&d, &s)| (d - 1) * s)
            .sum();
        Some(self.offset + span)
    }

    /// Narrow (slice) along a dimension. Returns a view into the same storage
    /// with adjusted shape and offset.
    ///
    /// Example: [4, 6] narrow(dim=1, start=2, len=3) gives [4, 3] at offset 2
    /// with strides [6, 1].
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Layout> {
        let rank = self.rank();
        if dim >= rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        let dim_size = self.shape.dims()[dim];
        if start + len > dim_size {
            return Err(Error::NarrowOutOfBounds {
                dim,
                start,
                len,
                dim_size,
            });
        }
        let mut dims = self.shape.dims().to_vec();
        dims[dim] = len;
        Ok(Layout {
            shape: Shape::new(dims),
            strides: self.strides.clone(),
            offset: self.offset + start * self.strides[dim],
        })
    }

    /// Flat buffer index of a multi-dimensional index.
    pub fn flat_index(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() {
            return Err(Error::RankMismatch {
                expected: self.rank(),
                got: index.len(),
            });
        }
        let mut flat = self.offset;
        for (dim, (&i, &size)) in index.iter().zip(self.dims()).enumerate() {
            if i >= size {
                return Err(Error::msg(format!(
                    "index {} out of range for dim {} of size {}",
                    i, dim, size
                )));
            }
            flat += i * self.strides[dim];
        }
        Ok(flat)
    }

    /// Iterator over the flat buffer index of every logical element, in
    /// row-major logical order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter: every addressable scalar position of a layout
//
// Rank-agnostic: the same loop serves a [N, 5] tensor and a [N, 3, 4] one.
// For a contiguous layout at offset k it counts k, k+1, k+2, ...

/// Iterator that yields flat storage indices for each element of a Layout.
#[derive(Debug, Clone)]
pub struct StridedIter {
    /// Multi-dimensional index of the next element.
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    /// Flat index of `current`, maintained incrementally.
    flat: usize,
    remaining: usize,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.dims().to_vec(),
            strides: layout.strides().to_vec(),
            flat: layout.offset(),
            remaining: layout.elem_count(),
        }
    }

    /// Multi-dimensional index of the element the next call to `next` yields.
    pub fn position(&self) -> &[usize] {
        &self.current
    }

    /// Step to the next logical element (rightmost dimension first).
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            self.flat += self.strides[i];
            if self.current[i] < self.dims[i] {
                return;
            }
            self.flat -= self.current[i] * self.strides[i];
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let flat = self.flat;
        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }
        Some(flat)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}
