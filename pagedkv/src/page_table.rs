//! Flattened per-batch page tables
//!
//! Sequence `i` owns the physical pages
//! `kv_indices[kv_indptr[i]..kv_indptr[i + 1]]`, in logical order.
//! `kv_last_page_len[i]` counts the valid slots of its last page **after**
//! the pending append has been accounted for.

use crate::ragged::validate_indptr;
use crate::{Error, Result};

/// Borrowed view over the three page-table arrays of a batch.
#[derive(Debug, Clone, Copy)]
pub struct PageTable<'a> {
    indices: &'a [i32],
    indptr: &'a [i32],
    last_page_len: &'a [i32],
}

impl<'a> PageTable<'a> {
    /// Validate and wrap the page-table arrays.
    ///
    /// `kv_indptr` must be a well-formed offsets array over `kv_indices`, and
    /// `kv_last_page_len` must hold one entry per sequence. Last-page lengths
    /// are checked against the page size during planning.
    ///
    /// # Errors
    /// Returns [`Error::MalformedIndex`] on any structural violation.
    pub fn new(
        kv_indices: &'a [i32],
        kv_indptr: &'a [i32],
        kv_last_page_len: &'a [i32],
    ) -> Result<Self> {
        validate_indptr("kv_indptr", kv_indptr, kv_indices.len())?;
        if kv_last_page_len.len() + 1 != kv_indptr.len() {
            return Err(Error::malformed(
                "kv_last_page_len",
                format!(
                    "has {} entries but kv_indptr describes {} sequences",
                    kv_last_page_len.len(),
                    kv_indptr.len() - 1
                ),
            ));
        }
        if let Some(seq) = kv_last_page_len.iter().position(|&len| len < 0) {
            return Err(Error::malformed(
                "kv_last_page_len",
                format!("entry {seq} is negative ({})", kv_last_page_len[seq]),
            ));
        }
        Ok(Self {
            indices: kv_indices,
            indptr: kv_indptr,
            last_page_len: kv_last_page_len,
        })
    }

    /// Number of sequences described by the table.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.last_page_len.len()
    }

    /// Physical page indices of sequence `seq`, in logical order.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn pages(&self, seq: usize) -> &'a [i32] {
        &self.indices[self.indptr[seq] as usize..self.indptr[seq + 1] as usize]
    }

    /// Number of pages allocated to sequence `seq`.
    #[must_use]
    pub fn num_pages(&self, seq: usize) -> usize {
        self.pages(seq).len()
    }

    /// Valid slots in the last page of sequence `seq`, post-append.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn last_page_len(&self, seq: usize) -> usize {
        self.last_page_len[seq] as usize
    }

    /// Total post-append token capacity of sequence `seq`:
    /// `(num_pages - 1) * page_size + last_page_len`, or 0 with no pages.
    #[must_use]
    pub fn capacity(&self, seq: usize, page_size: usize) -> usize {
        match self.num_pages(seq) {
            0 => 0,
            n => (n - 1) * page_size + self.last_page_len(seq),
        }
    }
}
