//! Byte-level tensor access
//!
//! The append path never interprets element values: it checks shapes and
//! dtypes, then moves raw bytes. A backend only has to expose its storage
//! as one contiguous, row-major byte slice.

use crate::dtype::DType;
use crate::{Error, Result};

/// Read access to a contiguous, row-major tensor.
pub trait Tensor {
    fn shape(&self) -> &[usize];

    fn dtype(&self) -> DType;

    /// Element bytes; exactly [`size_in_bytes`](Self::size_in_bytes) long.
    fn as_bytes(&self) -> &[u8];

    /// Element count (1 for a rank-0 tensor).
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    fn ndim(&self) -> usize {
        self.shape().len()
    }

    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }
}

/// Check that `tensor` exposes exactly as many bytes as its shape and dtype
/// describe.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] with the expected and actual byte counts.
pub fn check_byte_len<T: Tensor + ?Sized>(tensor: &T) -> Result<()> {
    let expected = tensor.size_in_bytes();
    let got = tensor.as_bytes().len();
    if got != expected {
        return Err(Error::ShapeMismatch {
            expected: vec![expected],
            got: vec![got],
        });
    }
    Ok(())
}

/// A tensor the append kernels can write into.
pub trait TensorMut: Tensor {
    fn as_bytes_mut(&mut self) -> &mut [u8];
}
