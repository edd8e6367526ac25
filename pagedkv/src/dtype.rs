//! Cache element types
//!
//! Appends move raw bytes, so a dtype only matters for its width and for
//! checking that the ragged rows and the cache agree.

use std::fmt;
use std::mem::size_of;

/// Element type of ragged rows and cache pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    /// IEEE 754 half precision
    F16,
    /// bfloat16
    BF16,
}

impl DType {
    /// Width of one element in bytes.
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 => size_of::<f32>(),
            Self::F16 => size_of::<half::f16>(),
            Self::BF16 => size_of::<half::bf16>(),
        }
    }

    /// Lowercase name, as printed in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust element types a host cache can be built from.
///
/// `Pod` lets typed buffers be viewed as the bytes the kernels copy.
pub trait TensorDType: bytemuck::Pod + Default + Send + Sync + 'static {
    const DTYPE: DType;
}

impl TensorDType for f32 {
    const DTYPE: DType = DType::F32;
}

impl TensorDType for half::f16 {
    const DTYPE: DType = DType::F16;
}

impl TensorDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
}
