//! Ragged batch offsets
//!
//! A ragged batch stores the rows of every sequence back to back. An
//! `indptr` array of length `batch_size + 1` delimits them: sequence `i`
//! owns rows `indptr[i]..indptr[i + 1]`.

use std::ops::Range;

use crate::{Error, Result};

/// Check that `indptr` is a well-formed offsets array over `total` items.
///
/// It must be non-empty, start at 0, be non-decreasing, and end at `total`.
///
/// # Errors
/// Returns [`Error::MalformedIndex`] naming `name` on the first violation.
pub fn validate_indptr(name: &'static str, indptr: &[i32], total: usize) -> Result<()> {
    let Some(&first) = indptr.first() else {
        return Err(Error::malformed(name, "must have at least one element"));
    };
    if first != 0 {
        return Err(Error::malformed(name, format!("must start at 0, got {first}")));
    }
    for (i, pair) in indptr.windows(2).enumerate() {
        if pair[1] < pair[0] {
            return Err(Error::malformed(
                name,
                format!(
                    "must be non-decreasing, but [{i}]={} > [{}]={}",
                    pair[0],
                    i + 1,
                    pair[1]
                ),
            ));
        }
    }
    let last = indptr[indptr.len() - 1];
    if usize::try_from(last).ok() != Some(total) {
        return Err(Error::malformed(
            name,
            format!("last element is {last} but {total} items were supplied"),
        ));
    }
    Ok(())
}

/// Iterator over the per-sequence row ranges of a validated offsets array.
#[derive(Debug, Clone)]
pub struct RaggedRanges<'a> {
    indptr: &'a [i32],
    next: usize,
}

impl<'a> RaggedRanges<'a> {
    /// Wrap an offsets array that has already passed [`validate_indptr`].
    pub(crate) fn new(indptr: &'a [i32]) -> Self {
        Self { indptr, next: 0 }
    }

    /// Number of sequences in the batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.indptr.len() - 1
    }

    /// Row range of sequence `seq`.
    ///
    /// # Panics
    /// Panics if `seq >= batch_size()`.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn range(&self, seq: usize) -> Range<usize> {
        self.indptr[seq] as usize..self.indptr[seq + 1] as usize
    }
}

impl Iterator for RaggedRanges<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next >= self.batch_size() {
            return None;
        }
        let range = self.range(self.next);
        self.next += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.batch_size() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RaggedRanges<'_> {}

/// Validate `append_indptr` against the ragged key and value row counts and
/// return the per-sequence row ranges.
///
/// # Errors
/// - [`Error::ShapeMismatch`] if key and value row counts differ.
/// - [`Error::MalformedIndex`] if `append_indptr` is malformed or does not
///   end at the row count.
pub fn ragged_ranges(
    append_indptr: &[i32],
    key_rows: usize,
    value_rows: usize,
) -> Result<RaggedRanges<'_>> {
    if key_rows != value_rows {
        return Err(Error::ShapeMismatch {
            expected: vec![key_rows],
            got: vec![value_rows],
        });
    }
    validate_indptr("append_indptr", append_indptr, key_rows)?;
    Ok(RaggedRanges::new(append_indptr))
}
