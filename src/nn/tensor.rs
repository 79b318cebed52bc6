//! Dense `f32` tensors exchanged with the inference runtime.
//!
//! Network inputs are built element by element from image samples, and network outputs are read
//! back as flat row-major slices. Shape checks return errors instead of panicking, since a model
//! bundle with unexpected outputs must surface as a detection failure.

use std::fmt;

use anyhow::{bail, ensure};
use tinyvec::TinyVec;

/// A dynamically shaped, row-major `f32` tensor.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: TinyVec<[usize; 4]>,
    data: Box<[f32]>,
}

impl Tensor {
    /// Creates an `N`-dimensional tensor by calling `f` for each element, in row-major order.
    ///
    /// `f` is invoked with successive indices, starting with `[0, ..., 0, 0]`, then
    /// `[0, ..., 0, 1]` and so on.
    pub fn from_shape_fn<const N: usize, F: FnMut([usize; N]) -> f32>(
        shape: [usize; N],
        mut f: F,
    ) -> Self {
        let len = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut index = [0; N];
        for _ in 0..len {
            data.push(f(index));
            // Advance the index like an odometer, innermost dimension first.
            for (i, size) in index.iter_mut().zip(shape).rev() {
                *i += 1;
                if *i < size {
                    break;
                }
                *i = 0;
            }
        }

        Self {
            shape: TinyVec::from(&shape[..]),
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor from its shape and flat row-major data.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> anyhow::Result<Self> {
        let len: usize = shape.iter().product();
        ensure!(
            len == data.len(),
            "tensor of shape {:?} needs {} elements, got {}",
            shape,
            len,
            data.len()
        );
        Ok(Self {
            shape: TinyVec::from(shape),
            data: data.into_boxed_slice(),
        })
    }

    pub(super) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        let data = tract.as_slice::<f32>()?.to_vec();
        Self::from_vec(tract.shape(), data)
    }

    pub(super) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        tract_onnx::prelude::Tensor::from_shape(&self.shape, &self.data)
    }

    /// Returns the number of entries in each dimension.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all elements in row-major order.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns an error naming `what` if the tensor does not have exactly the given shape.
    pub fn expect_shape(&self, what: &str, shape: &[usize]) -> anyhow::Result<&Self> {
        if self.shape() != shape {
            bail!(
                "{} has shape {:?}, expected {:?}",
                what,
                self.shape(),
                shape
            );
        }
        Ok(self)
    }

    /// Returns the only element of a tensor holding a single value (of any rank).
    pub fn scalar(&self) -> anyhow::Result<f32> {
        match &*self.data {
            [value] => Ok(*value),
            _ => bail!(
                "expected a single-element tensor, got shape {:?}",
                self.shape()
            ),
        }
    }
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Tensor::from_shape_fn([], |[]| value)
    }
}

impl<const N: usize> From<[f32; N]> for Tensor {
    fn from(arr: [f32; N]) -> Self {
        Tensor::from_shape_fn([N], |[i]| arr[i])
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .finish()
    }
}
