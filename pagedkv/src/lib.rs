//! pagedkv: append ragged key/value batches into a paged KV cache
//!
//! A paged KV cache stores attention keys and values in fixed-size pages
//! shared by every sequence in a batch. Each sequence reaches its pages
//! through a page table, so sequences can grow independently without
//! contiguous allocation.
//!
//! This crate provides the backend-neutral part of the append path:
//! layout resolution, ragged offset validation, page-table addressing, the
//! uniform per-page cache view, and the kernel strategy boundary. Backend
//! crates (such as `pagedkv-cpu`) supply tensors and faster kernels.

#![allow(clippy::module_name_repetitions)]

pub mod addressing;
pub mod append;
pub mod cache;
pub mod config;
pub mod dtype;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod page_table;
pub mod ragged;
pub mod tensor;

pub use addressing::{plan_append, AppendPlan, PageWrites, SlotAddress, SlotWrite};
pub use append::{append_paged_kv_cache, Appender};
pub use cache::{PageGeometry, PagePair, PagePools, PagedKvCache};
pub use config::AppendConfig;
pub use dtype::{DType, TensorDType};
pub use error::{Error, Result};
pub use kernel::{AppendKernel, RaggedRows, SerialKernel};
pub use layout::KvLayout;
pub use page_table::PageTable;
pub use ragged::{ragged_ranges, validate_indptr, RaggedRanges};
pub use tensor::{check_byte_len, Tensor, TensorMut};
