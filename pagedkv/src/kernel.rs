//! Scatter kernels and the kernel registry
//!
//! A kernel receives a finished [`AppendPlan`], the ragged source rows, and
//! the cache's per-page view, and copies every row to its destination. The
//! plan is fully validated before any kernel runs; kernels only move bytes.
//!
//! - [`AppendKernel`]: the strategy boundary the append path calls through.
//! - [`SerialKernel`]: single-threaded reference kernel, always registered.
//! - [`register`] / [`get`] / [`registered`]: global name → kernel registry.

#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use crate::addressing::{AppendPlan, SlotWrite};
use crate::cache::{PageGeometry, PagePair, PagePools};
use crate::layout::KvLayout;
use crate::Result;

/// Ragged key and value rows as raw bytes, `row_bytes` per row.
#[derive(Debug, Clone, Copy)]
pub struct RaggedRows<'a> {
    key: &'a [u8],
    value: &'a [u8],
    row_bytes: usize,
}

impl<'a> RaggedRows<'a> {
    /// Wrap validated source buffers. Both must hold the same number of rows.
    #[must_use]
    pub fn new(key: &'a [u8], value: &'a [u8], row_bytes: usize) -> Self {
        debug_assert_eq!(key.len(), value.len());
        Self {
            key,
            value,
            row_bytes,
        }
    }

    /// Key bytes of ragged row `row`.
    #[must_use]
    pub fn key_row(&self, row: usize) -> &'a [u8] {
        &self.key[row * self.row_bytes..(row + 1) * self.row_bytes]
    }

    /// Value bytes of ragged row `row`.
    #[must_use]
    pub fn value_row(&self, row: usize) -> &'a [u8] {
        &self.value[row * self.row_bytes..(row + 1) * self.row_bytes]
    }
}

/// Copy every planned row of one page into its key and value slices.
pub fn scatter_page(
    geometry: &PageGeometry,
    writes: &[SlotWrite],
    rows: &RaggedRows<'_>,
    page: PagePair<'_>,
) {
    let PagePair { key, value } = page;
    for write in writes {
        copy_row(geometry, write.slot, rows.key_row(write.row), key);
        copy_row(geometry, write.slot, rows.value_row(write.row), value);
    }
}

fn copy_row(geometry: &PageGeometry, slot: usize, src: &[u8], dst: &mut [u8]) {
    match geometry.layout {
        // All heads of a slot are contiguous
        KvLayout::Nhd => {
            let off = geometry.vector_byte_offset(slot, 0);
            dst[off..off + src.len()].copy_from_slice(src);
        }
        KvLayout::Hnd => {
            let vector_bytes = geometry.vector_bytes();
            for (head, vector) in src.chunks_exact(vector_bytes).enumerate() {
                let off = geometry.vector_byte_offset(slot, head);
                dst[off..off + vector_bytes].copy_from_slice(vector);
            }
        }
    }
}

/// A backend able to execute a validated append plan.
pub trait AppendKernel: Send + Sync {
    /// Registry name, e.g. `"serial"`.
    fn name(&self) -> &'static str;

    /// Selection priority when no kernel is named explicitly; higher wins.
    fn priority(&self) -> i32 {
        0
    }

    /// Copy every row of `plan` from `rows` into `pools`.
    ///
    /// # Errors
    /// Returns an error if a planned page is unavailable in `pools`. The
    /// cache may then be partially written.
    fn launch(&self, plan: &AppendPlan, rows: &RaggedRows<'_>, pools: PagePools<'_>) -> Result<()>;
}

/// Single-threaded reference kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialKernel;

impl AppendKernel for SerialKernel {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn launch(
        &self,
        plan: &AppendPlan,
        rows: &RaggedRows<'_>,
        mut pools: PagePools<'_>,
    ) -> Result<()> {
        let geometry = *pools.geometry();
        for (writes, page) in pools.take_pages(plan)? {
            scatter_page(&geometry, &writes.writes, rows, page);
        }
        Ok(())
    }
}

type RegistryMap = HashMap<&'static str, Arc<dyn AppendKernel>>;

static REGISTRY: LazyLock<RwLock<RegistryMap>> = LazyLock::new(|| {
    let mut map: RegistryMap = HashMap::new();
    map.insert(SerialKernel.name(), Arc::new(SerialKernel));
    RwLock::new(map)
});

/// Register a kernel under its [`name`](AppendKernel::name).
///
/// A kernel already registered under the same name is replaced.
pub fn register(kernel: Arc<dyn AppendKernel>) {
    let name = kernel.name();
    let mut map = REGISTRY.write().expect("kernel registry poisoned");
    if map.insert(name, kernel).is_some() {
        log::debug!("replaced append kernel {name:?}");
    } else {
        log::info!("registered append kernel {name:?}");
    }
}

/// Look up a kernel by name.
pub fn get(name: &str) -> Option<Arc<dyn AppendKernel>> {
    let map = REGISTRY.read().expect("kernel registry poisoned");
    map.get(name).cloned()
}

/// Names of all registered kernels, sorted.
pub fn registered() -> Vec<&'static str> {
    let map = REGISTRY.read().expect("kernel registry poisoned");
    let mut names: Vec<_> = map.keys().copied().collect();
    names.sort_unstable();
    names
}

/// The registered kernel with the highest priority (ties broken by name).
pub fn preferred() -> Arc<dyn AppendKernel> {
    let map = REGISTRY.read().expect("kernel registry poisoned");
    map.values()
        .max_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| b.name().cmp(a.name()))
        })
        .cloned()
        .unwrap_or_else(|| Arc::new(SerialKernel))
}
