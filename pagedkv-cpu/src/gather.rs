//! Read appended rows back out of a paged cache.

use pagedkv::tensor::Tensor;
use pagedkv::{Error, KvLayout, Result, SlotAddress};

use crate::tensor::CpuTensor;

/// Gather the `(num_kv_heads, head_dim)` rows stored at `addrs` from a 4-D
/// pool into a `(addrs.len(), num_kv_heads, head_dim)` tensor.
///
/// # Errors
/// Returns an error if `pool` is not 4-D or an address is out of range.
pub fn gather_rows(
    pool: &CpuTensor,
    layout: KvLayout,
    addrs: &[SlotAddress],
) -> Result<CpuTensor> {
    let shape = pool.shape();
    if shape.len() != 4 {
        return Err(Error::InvalidShape(format!(
            "gather_rows expects a 4-D pool, got {shape:?}"
        )));
    }
    let (page_size, num_kv_heads, head_dim) = layout.page_dims(shape)?;
    let elem = pool.dtype().size_in_bytes();
    let vector_bytes = head_dim * elem;
    let page_bytes = page_size * num_kv_heads * vector_bytes;
    let bytes = pool.as_bytes();

    let mut out = Vec::with_capacity(addrs.len() * num_kv_heads * vector_bytes);
    for addr in addrs {
        if addr.page >= shape[0] || addr.slot >= page_size {
            return Err(Error::IndexOutOfRange(format!(
                "address {addr:?} outside {} pages of {page_size} slots",
                shape[0]
            )));
        }
        let page = &bytes[addr.page * page_bytes..(addr.page + 1) * page_bytes];
        for head in 0..num_kv_heads {
            let off =
                layout.vector_offset(page_size, num_kv_heads, head_dim, addr.slot, head) * elem;
            out.extend_from_slice(&page[off..off + vector_bytes]);
        }
    }
    Ok(CpuTensor::from_raw(
        &[addrs.len(), num_kv_heads, head_dim],
        pool.dtype(),
        out,
    ))
}

/// Copy the key and value halves out of a combined
/// `(max_num_pages, 2, ...)` pool as two 4-D pools.
///
/// # Errors
/// Returns an error if `kv` is not 5-D with a second axis of 2.
pub fn split_combined(kv: &CpuTensor) -> Result<(CpuTensor, CpuTensor)> {
    let shape = kv.shape();
    if shape.len() != 5 || shape[1] != 2 {
        return Err(Error::ShapeMismatch {
            expected: vec![shape.first().copied().unwrap_or(0), 2, 0, 0, 0],
            got: shape.to_vec(),
        });
    }
    let half_bytes: usize = shape[2..].iter().product::<usize>() * kv.dtype().size_in_bytes();
    let mut k = Vec::with_capacity(shape[0] * half_bytes);
    let mut v = Vec::with_capacity(shape[0] * half_bytes);
    for page in kv.as_bytes().chunks_exact(2 * half_bytes) {
        k.extend_from_slice(&page[..half_bytes]);
        v.extend_from_slice(&page[half_bytes..]);
    }
    let pool_shape = [shape[0], shape[2], shape[3], shape[4]];
    Ok((
        CpuTensor::from_raw(&pool_shape, kv.dtype(), k),
        CpuTensor::from_raw(&pool_shape, kv.dtype(), v),
    ))
}
