//! The append operation
//!
//! Every check runs before the cache is split into pages: a call that
//! returns a validation error leaves the cache byte-for-byte unchanged.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::addressing::plan_append;
use crate::cache::PagedKvCache;
use crate::config::AppendConfig;
use crate::kernel::{self, AppendKernel, RaggedRows};
use crate::layout::KvLayout;
use crate::page_table::PageTable;
use crate::ragged::ragged_ranges;
use crate::tensor::{check_byte_len, Tensor, TensorMut};
use crate::{Error, Result};

static GLOBAL: OnceLock<Appender> = OnceLock::new();

/// A configuration bound to a resolved kernel.
pub struct Appender {
    config: AppendConfig,
    kernel: Arc<dyn AppendKernel>,
}

impl fmt::Debug for Appender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Appender")
            .field("config", &self.config)
            .field("kernel", &self.kernel.name())
            .finish()
    }
}

impl Appender {
    /// Resolve the kernel named by `config`, or the preferred registered
    /// kernel when none is named.
    ///
    /// # Errors
    /// Returns [`Error::UnknownKernel`] if the named kernel is not registered.
    pub fn new(config: AppendConfig) -> Result<Self> {
        let kernel = match config.kernel.as_deref() {
            Some(name) => kernel::get(name).ok_or_else(|| {
                Error::UnknownKernel(format!(
                    "{name:?} (registered: {:?})",
                    kernel::registered()
                ))
            })?,
            None => kernel::preferred(),
        };
        Ok(Self::with_kernel(kernel, config))
    }

    /// Use `kernel` directly, ignoring `config.kernel`.
    #[must_use]
    pub fn with_kernel(kernel: Arc<dyn AppendKernel>, config: AppendConfig) -> Self {
        Self { config, kernel }
    }

    /// The process-wide appender, built once from the environment on first
    /// use.
    ///
    /// Backends must register their kernels before the first call; later
    /// registrations do not change the selection.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            let config = AppendConfig::from_env();
            let appender = Self::new(config.clone()).unwrap_or_else(|err| {
                log::warn!("{err}; using the preferred kernel instead");
                Self::with_kernel(
                    kernel::preferred(),
                    AppendConfig {
                        kernel: None,
                        ..config
                    },
                )
            });
            log::info!("append kernel selected: {}", appender.kernel_name());
            appender
        })
    }

    /// Name of the bound kernel.
    #[must_use]
    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    #[must_use]
    pub fn config(&self) -> &AppendConfig {
        &self.config
    }

    /// Append a ragged batch of key/value rows into a paged cache.
    ///
    /// See [`append_paged_kv_cache`] for the argument contract.
    ///
    /// # Errors
    /// See [`append_paged_kv_cache`].
    #[allow(clippy::too_many_arguments)]
    pub fn append<S: Tensor, C: TensorMut>(
        &self,
        append_key: &S,
        append_value: &S,
        append_indptr: &[i32],
        paged_kv_cache: PagedKvCache<'_, C>,
        kv_indices: &[i32],
        kv_indptr: &[i32],
        kv_last_page_len: &[i32],
        layout: KvLayout,
    ) -> Result<()> {
        let geometry = paged_kv_cache.geometry(layout)?;

        for src in [append_key, append_value] {
            let shape = src.shape();
            if shape.len() != 3
                || shape[1] != geometry.num_kv_heads
                || shape[2] != geometry.head_dim
            {
                return Err(Error::ShapeMismatch {
                    expected: vec![
                        shape.first().copied().unwrap_or(0),
                        geometry.num_kv_heads,
                        geometry.head_dim,
                    ],
                    got: shape.to_vec(),
                });
            }
            if src.dtype() != geometry.dtype {
                return Err(Error::DtypeMismatch {
                    expected: geometry.dtype.to_string(),
                    got: src.dtype().to_string(),
                });
            }
            check_byte_len(src)?;
        }

        let ranges = ragged_ranges(
            append_indptr,
            append_key.shape()[0],
            append_value.shape()[0],
        )?;
        let table = PageTable::new(kv_indices, kv_indptr, kv_last_page_len)?;
        let plan = plan_append(
            ranges,
            &table,
            geometry.page_size,
            geometry.max_num_pages,
            self.config.check_overlap,
        )?;

        log::debug!(
            "append: batch_size={} rows={} pages_touched={} page_size={} layout={} dtype={} kernel={}",
            table.batch_size(),
            plan.num_rows(),
            plan.page_writes().len(),
            geometry.page_size,
            layout,
            geometry.dtype,
            self.kernel.name(),
        );

        if plan.is_empty() {
            return Ok(());
        }

        let rows = RaggedRows::new(
            append_key.as_bytes(),
            append_value.as_bytes(),
            geometry.row_bytes(),
        );
        let pools = paged_kv_cache.into_pools(layout)?;
        self.kernel.launch(&plan, &rows, pools)
    }
}

/// Append a batch of key/value rows to a paged key-value cache.
///
/// * `append_key`, `append_value`: ragged rows, shape
///   `(append_indptr[-1], num_kv_heads, head_dim)`, same dtype as the cache.
/// * `append_indptr`: row offsets per sequence, shape `(batch_size + 1,)`.
/// * `paged_kv_cache`: separate `(max_num_pages, page_size, H, D)` pools or
///   one `(max_num_pages, 2, page_size, H, D)` pool for `NHD`; the slot and
///   head axes swap for `HND`.
/// * `kv_indices`: physical pages of all sequences, shape `(kv_indptr[-1],)`.
/// * `kv_indptr`: page offsets per sequence, shape `(batch_size + 1,)`.
/// * `kv_last_page_len`: valid slots in each sequence's last page, shape
///   `(batch_size,)`.
/// * `kv_layout`: `"NHD"` or `"HND"`.
///
/// The page table must already include the appended rows: `kv_indptr`,
/// `kv_indices` and `kv_last_page_len` describe the state *after* this call.
/// New rows of sequence `i` start at logical position
/// `capacity_i - append_len_i`. A caller that passes the pre-append
/// `kv_last_page_len` by mistake is only caught when the append no longer
/// fits (`CapacityExceeded`); otherwise it is indistinguishable from a
/// shorter append and rows land one step early.
///
/// The call runs through [`Appender::global`].
///
/// # Errors
/// - [`Error::InvalidLayout`] for an unknown layout token, before any other
///   check.
/// - [`Error::ShapeMismatch`] / [`Error::InvalidShape`] /
///   [`Error::DtypeMismatch`] for inconsistent tensors.
/// - [`Error::MalformedIndex`] for malformed offset arrays.
/// - [`Error::CapacityExceeded`] when a sequence's pages cannot hold its rows.
/// - [`Error::IndexOutOfRange`] for physical pages outside the cache.
/// - [`Error::OverlappingWrite`] when two rows share a destination.
///
/// All of the above leave the cache unchanged.
#[allow(clippy::too_many_arguments)]
pub fn append_paged_kv_cache<S: Tensor, C: TensorMut>(
    append_key: &S,
    append_value: &S,
    append_indptr: &[i32],
    paged_kv_cache: PagedKvCache<'_, C>,
    kv_indices: &[i32],
    kv_indptr: &[i32],
    kv_last_page_len: &[i32],
    kv_layout: &str,
) -> Result<()> {
    let layout: KvLayout = kv_layout.parse()?;
    Appender::global().append(
        append_key,
        append_value,
        append_indptr,
        paged_kv_cache,
        kv_indices,
        kv_indptr,
        kv_last_page_len,
        layout,
    )
}
