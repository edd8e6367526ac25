//! Rayon-parallel append kernel.
//!
//! Work is split by physical page: each touched page's key and value slices
//! go to exactly one worker, so workers never share a destination byte.

use pagedkv::kernel::{scatter_page, AppendKernel, RaggedRows};
use pagedkv::{AppendPlan, PagePools, Result};
use rayon::prelude::*;

/// Below this many touched pages the kernel stays on the calling thread.
pub const DEFAULT_MIN_PARALLEL_PAGES: usize = 4;

/// Parallel CPU kernel, one task per touched page.
#[derive(Debug, Clone, Copy)]
pub struct RayonKernel {
    min_parallel_pages: usize,
}

impl Default for RayonKernel {
    fn default() -> Self {
        Self {
            min_parallel_pages: DEFAULT_MIN_PARALLEL_PAGES,
        }
    }
}

impl RayonKernel {
    /// Kernel that fans out once at least `min_parallel_pages` pages are touched.
    #[must_use]
    pub fn with_min_parallel_pages(min_parallel_pages: usize) -> Self {
        Self { min_parallel_pages }
    }
}

impl AppendKernel for RayonKernel {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn launch(
        &self,
        plan: &AppendPlan,
        rows: &RaggedRows<'_>,
        mut pools: PagePools<'_>,
    ) -> Result<()> {
        let geometry = *pools.geometry();
        let pages = pools.take_pages(plan)?;

        if pages.len() < self.min_parallel_pages {
            // Decode steps usually touch a handful of pages: skip thread-pool overhead
            for (writes, page) in pages {
                scatter_page(&geometry, &writes.writes, rows, page);
            }
        } else {
            pages.into_par_iter().for_each(|(writes, page)| {
                scatter_page(&geometry, &writes.writes, rows, page);
            });
        }
        Ok(())
    }
}
