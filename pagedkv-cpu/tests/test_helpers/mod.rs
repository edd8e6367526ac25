//! Shared helpers for append integration tests.
//!
//! Builds ragged batches and their page tables, and derives the expected
//! destination of every row from the pre-append sequence length, which is
//! independent of how the library derives it.

#![allow(dead_code, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::sync::Arc;

use pagedkv::{AppendConfig, Appender, KvLayout, SlotAddress};
use pagedkv_cpu::{CpuTensor, RayonKernel};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// A ragged append batch plus the post-append page table.
#[derive(Debug, Clone)]
pub struct Batch {
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub page_size: usize,
    pub max_num_pages: usize,
    /// Tokens already cached per sequence before this append.
    pub existing: Vec<usize>,
    pub append_indptr: Vec<i32>,
    pub kv_indices: Vec<i32>,
    pub kv_indptr: Vec<i32>,
    pub kv_last_page_len: Vec<i32>,
    pub key: Vec<f32>,
    pub value: Vec<f32>,
}

impl Batch {
    /// Build a batch from per-sequence `(existing, append)` lengths, using
    /// `page_order` as the pool of physical pages handed out in order.
    pub fn build(
        lengths: &[(usize, usize)],
        page_size: usize,
        num_kv_heads: usize,
        head_dim: usize,
        page_order: &[usize],
        max_num_pages: usize,
    ) -> Self {
        let mut append_indptr = vec![0i32];
        let mut kv_indptr = vec![0i32];
        let mut kv_indices = Vec::new();
        let mut kv_last_page_len = Vec::new();
        let mut next_page = 0;

        for &(existing, append) in lengths {
            let total = existing + append;
            let num_pages = total.div_ceil(page_size);
            kv_indices.extend(
                page_order[next_page..next_page + num_pages]
                    .iter()
                    .map(|&p| p as i32),
            );
            next_page += num_pages;
            let last = if num_pages == 0 {
                0
            } else {
                total - (num_pages - 1) * page_size
            };
            kv_last_page_len.push(last as i32);
            kv_indptr.push(kv_indices.len() as i32);
            append_indptr.push(append_indptr.last().unwrap() + append as i32);
        }

        let rows = *append_indptr.last().unwrap() as usize;
        let n = rows * num_kv_heads * head_dim;
        Self {
            num_kv_heads,
            head_dim,
            page_size,
            max_num_pages,
            existing: lengths.iter().map(|&(e, _)| e).collect(),
            append_indptr,
            kv_indices,
            kv_indptr,
            kv_last_page_len,
            key: pseudo_random(n, 7),
            value: pseudo_random(n, 11),
        }
    }

    /// 4 sequences appending `[45, 8, 25, 22]` rows into fresh pages
    /// `0..8` with page size 16.
    pub fn scenario(num_kv_heads: usize, head_dim: usize, max_num_pages: usize) -> Self {
        let pages: Vec<usize> = (0..8).collect();
        let batch = Self::build(
            &[(0, 45), (0, 8), (0, 25), (0, 22)],
            16,
            num_kv_heads,
            head_dim,
            &pages,
            max_num_pages,
        );
        assert_eq!(batch.append_indptr, vec![0, 45, 53, 78, 100]);
        assert_eq!(batch.kv_indptr, vec![0, 3, 4, 6, 8]);
        assert_eq!(batch.kv_last_page_len, vec![13, 8, 9, 6]);
        batch
    }

    /// A random batch: random lengths, shuffled physical pages.
    pub fn random(rng: &mut StdRng) -> Self {
        let page_size = *[1usize, 3, 4, 16].choose(rng).unwrap();
        let num_kv_heads = rng.gen_range(1..=3);
        let head_dim = rng.gen_range(1..=5);
        let batch_size = rng.gen_range(1..=6);
        let lengths: Vec<(usize, usize)> = (0..batch_size)
            .map(|_| (rng.gen_range(0..40), rng.gen_range(0..40)))
            .collect();
        let pages_needed: usize = lengths
            .iter()
            .map(|&(e, a)| (e + a).div_ceil(page_size))
            .sum();
        let max_num_pages = pages_needed + rng.gen_range(0..4);
        let mut page_order: Vec<usize> = (0..max_num_pages).collect();
        page_order.shuffle(rng);
        Self::build(
            &lengths,
            page_size,
            num_kv_heads,
            head_dim,
            &page_order,
            max_num_pages,
        )
    }

    pub fn rows(&self) -> usize {
        *self.append_indptr.last().unwrap() as usize
    }

    pub fn row_shape(&self) -> [usize; 3] {
        [self.rows(), self.num_kv_heads, self.head_dim]
    }

    pub fn key_tensor(&self) -> CpuTensor {
        CpuTensor::from_f32(&self.row_shape(), &self.key)
    }

    pub fn value_tensor(&self) -> CpuTensor {
        CpuTensor::from_f32(&self.row_shape(), &self.value)
    }

    /// Shape of one separate key or value pool.
    pub fn pool_shape(&self, layout: KvLayout) -> Vec<usize> {
        let mut shape = vec![self.max_num_pages];
        shape.extend(layout.page_shape(self.page_size, self.num_kv_heads, self.head_dim));
        shape
    }

    /// Shape of a combined key/value pool.
    pub fn combined_shape(&self, layout: KvLayout) -> Vec<usize> {
        let mut shape = vec![self.max_num_pages, 2];
        shape.extend(layout.page_shape(self.page_size, self.num_kv_heads, self.head_dim));
        shape
    }

    /// Destination of every ragged row: sequence `i` continues after its
    /// `existing[i]` cached tokens.
    pub fn expected_destinations(&self) -> Vec<SlotAddress> {
        let mut out = Vec::with_capacity(self.rows());
        for (seq, &existing) in self.existing.iter().enumerate() {
            let pages =
                &self.kv_indices[self.kv_indptr[seq] as usize..self.kv_indptr[seq + 1] as usize];
            let append = (self.append_indptr[seq + 1] - self.append_indptr[seq]) as usize;
            for j in 0..append {
                let pos = existing + j;
                out.push(SlotAddress {
                    page: pages[pos / self.page_size] as usize,
                    slot: pos % self.page_size,
                });
            }
        }
        out
    }

    /// Element offset of `(page, slot, head)` in a whole 4-D pool.
    pub fn pool_offset(&self, layout: KvLayout, page: usize, slot: usize, head: usize) -> usize {
        let (h, d, ps) = (self.num_kv_heads, self.head_dim, self.page_size);
        match layout {
            KvLayout::Nhd => ((page * ps + slot) * h + head) * d,
            KvLayout::Hnd => ((page * h + head) * ps + slot) * d,
        }
    }

    /// The pool expected after appending `src` into a pool filled with `fill`.
    pub fn expected_pool(&self, layout: KvLayout, fill: f32, src: &[f32]) -> Vec<f32> {
        let numel: usize = self.pool_shape(layout).iter().product();
        let mut pool = vec![fill; numel];
        let (h, d) = (self.num_kv_heads, self.head_dim);
        for (row, addr) in self.expected_destinations().into_iter().enumerate() {
            for head in 0..h {
                let dst = self.pool_offset(layout, addr.page, addr.slot, head);
                let src_off = (row * h + head) * d;
                pool[dst..dst + d].copy_from_slice(&src[src_off..src_off + d]);
            }
        }
        pool
    }
}

/// Appender bound to the named kernel. The rayon kernel always fans out.
pub fn appender(kernel: &str) -> Appender {
    let config = AppendConfig::default();
    match kernel {
        "rayon" => Appender::with_kernel(Arc::new(RayonKernel::with_min_parallel_pages(1)), config),
        "serial" => Appender::with_kernel(Arc::new(pagedkv::SerialKernel), config),
        other => panic!("unknown test kernel {other}"),
    }
}

/// Deterministic pseudo-random f32 in [-1, 1] (xorshift64).
pub fn pseudo_random(n: usize, seed: u64) -> Vec<f32> {
    let mut values = Vec::with_capacity(n);
    let mut state: u64 = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    for _ in 0..n {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        #[allow(clippy::cast_precision_loss)]
        let f = (state as f32) / (u64::MAX as f32);
        values.push(f * 2.0 - 1.0);
    }
    values
}

/// Split a flat `(rows, H, D)` buffer into per-row vectors.
pub fn rows_of(data: &[f32], num_kv_heads: usize, head_dim: usize) -> Vec<Vec<f32>> {
    data.chunks_exact(num_kv_heads * head_dim)
        .map(<[f32]>::to_vec)
        .collect()
}
