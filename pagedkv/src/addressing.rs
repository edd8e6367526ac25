//! Cache addressing: ragged rows to physical `(page, slot)` pairs
//!
//! Because `kv_last_page_len` is the occupancy *after* the append, the first
//! new row of sequence `i` sits at logical position
//! `start_i = capacity_i - append_len_i`. Row `j` then maps to logical page
//! `(start_i + j) / page_size` at slot `(start_i + j) % page_size`, and the
//! page table turns the logical page into a physical one.

use std::collections::{BTreeMap, HashMap};

use crate::page_table::PageTable;
use crate::ragged::RaggedRanges;
use crate::{Error, Result};

/// Physical destination of one appended row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotAddress {
    /// Physical page index into the cache.
    pub page: usize,
    /// Token slot within the page.
    pub slot: usize,
}

/// One row copy into a known page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWrite {
    /// Destination slot within the page.
    pub slot: usize,
    /// Source row in the ragged batch.
    pub row: usize,
}

/// All writes that land in one physical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWrites {
    /// Physical page index.
    pub page: usize,
    /// Writes into this page, in ragged-row order.
    pub writes: Vec<SlotWrite>,
}

/// Fully resolved destinations for one append call.
///
/// Built before any byte of the cache is touched, so every addressing error
/// surfaces while the cache is still unmodified.
#[derive(Debug, Clone, Default)]
pub struct AppendPlan {
    destinations: Vec<SlotAddress>,
    page_writes: Vec<PageWrites>,
}

impl AppendPlan {
    /// Destination of every ragged row; `destinations()[row]`.
    #[must_use]
    pub fn destinations(&self) -> &[SlotAddress] {
        &self.destinations
    }

    /// Writes grouped by physical page, sorted by page index. Each page
    /// appears at most once.
    #[must_use]
    pub fn page_writes(&self) -> &[PageWrites] {
        &self.page_writes
    }

    /// Number of appended rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.destinations.len()
    }

    /// True when no rows are appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

/// Compute the physical destination of every appended row.
///
/// `max_num_pages` bounds the physical page indices. With `check_overlap`,
/// two rows resolving to the same `(page, slot)` are rejected.
///
/// # Errors
/// - [`Error::MalformedIndex`] if batch sizes disagree or a last-page length
///   exceeds `page_size`.
/// - [`Error::CapacityExceeded`] if a sequence appends more rows than its
///   pages hold.
/// - [`Error::IndexOutOfRange`] if a physical page is negative or
///   `>= max_num_pages`.
/// - [`Error::OverlappingWrite`] on a duplicate destination.
/// - [`Error::InvalidShape`] if `page_size` is zero.
pub fn plan_append(
    ranges: RaggedRanges<'_>,
    table: &PageTable<'_>,
    page_size: usize,
    max_num_pages: usize,
    check_overlap: bool,
) -> Result<AppendPlan> {
    if page_size == 0 {
        return Err(Error::InvalidShape("page_size must be > 0".to_string()));
    }
    if ranges.batch_size() != table.batch_size() {
        return Err(Error::malformed(
            "append_indptr",
            format!(
                "describes {} sequences but the page table describes {}",
                ranges.batch_size(),
                table.batch_size()
            ),
        ));
    }

    for seq in 0..table.batch_size() {
        let last = table.last_page_len(seq);
        if last > page_size {
            return Err(Error::malformed(
                "kv_last_page_len",
                format!("entry {seq} is {last}, larger than page_size {page_size}"),
            ));
        }
    }

    let mut destinations = Vec::new();
    for (seq, rows) in ranges.enumerate() {
        let append_len = rows.len();
        let capacity = table.capacity(seq, page_size);
        if append_len > capacity {
            return Err(Error::CapacityExceeded {
                seq,
                append_len,
                capacity,
            });
        }

        let pages = table.pages(seq);
        let start = capacity - append_len;
        for pos in start..capacity {
            let logical_page = pos / page_size;
            let slot = pos % page_size;
            let Some(&physical) = pages.get(logical_page) else {
                return Err(Error::IndexOutOfRange(format!(
                    "sequence {seq}: logical page {logical_page} but only {} pages allocated",
                    pages.len()
                )));
            };
            let page = usize::try_from(physical)
                .ok()
                .filter(|&p| p < max_num_pages)
                .ok_or_else(|| {
                    Error::IndexOutOfRange(format!(
                        "sequence {seq}: physical page {physical} outside [0, {max_num_pages})"
                    ))
                })?;
            destinations.push(SlotAddress { page, slot });
        }
    }

    if check_overlap {
        let mut seen: HashMap<SlotAddress, usize> = HashMap::with_capacity(destinations.len());
        for (row, &addr) in destinations.iter().enumerate() {
            if let Some(first) = seen.insert(addr, row) {
                return Err(Error::OverlappingWrite {
                    page: addr.page,
                    slot: addr.slot,
                    first,
                    second: row,
                });
            }
        }
    }

    let mut grouped: BTreeMap<usize, Vec<SlotWrite>> = BTreeMap::new();
    for (row, addr) in destinations.iter().enumerate() {
        grouped.entry(addr.page).or_default().push(SlotWrite {
            slot: addr.slot,
            row,
        });
    }
    let page_writes = grouped
        .into_iter()
        .map(|(page, writes)| PageWrites { page, writes })
        .collect();

    Ok(AppendPlan {
        destinations,
        page_writes,
    })
}
