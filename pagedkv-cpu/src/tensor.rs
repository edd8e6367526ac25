//! CPU tensor implementation.

use std::sync::Arc;

use pagedkv::dtype::{DType, TensorDType};
use pagedkv::tensor::{Tensor, TensorMut};

/// A host tensor backed by shared byte storage.
///
/// Uses `Arc<Vec<u8>>` so clones are cheap; the first in-place write to a
/// shared tensor copies its storage.
#[derive(Clone, Debug)]
pub struct CpuTensor {
    data: Arc<Vec<u8>>,
    shape: Vec<usize>,
    dtype: DType,
}

impl CpuTensor {
    /// Create a tensor from a typed slice.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape.
    #[must_use]
    pub fn from_slice<T: TensorDType>(shape: &[usize], data: &[T]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data len {} != shape product {numel}",
            data.len()
        );
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            shape: shape.to_vec(),
            dtype: T::DTYPE,
        }
    }

    /// Create a tensor from an f32 slice.
    #[must_use]
    pub fn from_f32(shape: &[usize], data: &[f32]) -> Self {
        Self::from_slice(shape, data)
    }

    /// Create a tensor from raw bytes with a given dtype.
    ///
    /// # Panics
    /// Panics if `data` is not exactly the shape's byte size.
    #[must_use]
    pub fn from_raw(shape: &[usize], dtype: DType, data: Vec<u8>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel * dtype.size_in_bytes(),
            "raw data has {} bytes, shape {shape:?} of {dtype} needs {}",
            data.len(),
            numel * dtype.size_in_bytes()
        );
        Self {
            data: Arc::new(data),
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// Create a zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            data: Arc::new(vec![0u8; numel * dtype.size_in_bytes()]),
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// Create a tensor with every element set to `value`, e.g. a sentinel
    /// that makes stray cache writes visible.
    #[must_use]
    pub fn full<T: TensorDType>(shape: &[usize], value: T) -> Self {
        let numel: usize = shape.iter().product();
        Self::from_slice(shape, &vec![value; numel])
    }

    /// Copy the elements out as `T`.
    ///
    /// # Panics
    /// Panics if `T` does not match the tensor dtype.
    #[must_use]
    pub fn to_vec<T: TensorDType>(&self) -> Vec<T> {
        assert_eq!(self.dtype, T::DTYPE, "expected {} tensor", T::DTYPE);
        self.data
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    /// Convert to an f32 Vec, casting from bf16/f16 if necessary.
    #[must_use]
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self.dtype {
            DType::F32 => self.to_vec::<f32>(),
            DType::BF16 => self
                .to_vec::<half::bf16>()
                .into_iter()
                .map(half::bf16::to_f32)
                .collect(),
            DType::F16 => self
                .to_vec::<half::f16>()
                .into_iter()
                .map(half::f16::to_f32)
                .collect(),
        }
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl TensorMut for CpuTensor {
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }
}
