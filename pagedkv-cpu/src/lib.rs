//! CPU backend for pagedkv.
//!
//! Provides a host tensor type, a rayon-parallel append kernel, and helpers
//! to read appended rows back out of a cache.
//!
//! Call [`init`] once at startup, before the first
//! [`append_paged_kv_cache`](pagedkv::append_paged_kv_cache), so the global
//! appender can select the parallel kernel.

#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]
#![cfg_attr(
    test,
    allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss
    )
)]

pub mod gather;
pub mod kernel;
pub mod tensor;

use std::sync::{Arc, Once};

pub use gather::{gather_rows, split_combined};
pub use kernel::RayonKernel;
pub use tensor::CpuTensor;

static INIT: Once = Once::new();

/// Register the CPU kernels with the pagedkv kernel registry.
///
/// Safe to call multiple times; only the first call registers.
pub fn init() {
    INIT.call_once(|| {
        pagedkv::kernel::register(Arc::new(RayonKernel::default()));
        log::debug!(
            "registered rayon append kernel ({} worker threads)",
            rayon::current_num_threads()
        );
    });
}
