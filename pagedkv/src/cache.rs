//! Paged KV cache buffers and their uniform per-page view
//!
//! A cache arrives either as two 4-D tensors (key pool and value pool) or as
//! one 5-D tensor with a key/value axis of extent 2:
//!
//! | arrangement | NHD shape                               | HND shape                               |
//! |-------------|-----------------------------------------|-----------------------------------------|
//! | separate    | `(max_num_pages, page_size, H, D)`      | `(max_num_pages, H, page_size, D)`      |
//! | combined    | `(max_num_pages, 2, page_size, H, D)`   | `(max_num_pages, 2, H, page_size, D)`   |
//!
//! Both are resolved into [`PagePools`]: one disjoint key slice and one
//! disjoint value slice per physical page. Kernels only ever see that view.

use crate::addressing::{AppendPlan, PageWrites};
use crate::dtype::DType;
use crate::layout::KvLayout;
use crate::tensor::{check_byte_len, TensorMut};
use crate::{Error, Result};

/// The caller's cache buffers.
pub enum PagedKvCache<'a, C: TensorMut> {
    /// Separate key and value pools, each 4-D.
    Separate { k: &'a mut C, v: &'a mut C },
    /// One 5-D pool; `[:, 0]` is the key cache and `[:, 1]` the value cache.
    Combined(&'a mut C),
}

/// Dimensions shared by every page of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub max_num_pages: usize,
    pub page_size: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub dtype: DType,
    pub layout: KvLayout,
}

impl PageGeometry {
    /// Bytes in one `head_dim` vector.
    #[must_use]
    pub fn vector_bytes(&self) -> usize {
        self.head_dim * self.dtype.size_in_bytes()
    }

    /// Bytes in one token row `(num_kv_heads, head_dim)`.
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.num_kv_heads * self.vector_bytes()
    }

    /// Bytes in one page of the key (or value) cache.
    #[must_use]
    pub fn page_bytes(&self) -> usize {
        self.page_size * self.row_bytes()
    }

    /// Byte offset of the `(slot, head)` vector within a page.
    #[must_use]
    pub fn vector_byte_offset(&self, slot: usize, head: usize) -> usize {
        self.layout
            .vector_offset(self.page_size, self.num_kv_heads, self.head_dim, slot, head)
            * self.dtype.size_in_bytes()
    }

    fn from_page_shape(
        shape: &[usize],
        dtype: DType,
        layout: KvLayout,
    ) -> Result<Self> {
        let (page_size, num_kv_heads, head_dim) = layout.page_dims(shape)?;
        if page_size == 0 || num_kv_heads == 0 || head_dim == 0 {
            return Err(Error::InvalidShape(format!(
                "page_size, num_kv_heads and head_dim must be > 0, got cache shape {shape:?}"
            )));
        }
        Ok(Self {
            max_num_pages: shape[0],
            page_size,
            num_kv_heads,
            head_dim,
            dtype,
            layout,
        })
    }
}

impl<C: TensorMut> PagedKvCache<'_, C> {
    /// Validate the buffers against `layout` and describe their pages.
    ///
    /// # Errors
    /// - [`Error::ShapeMismatch`] if ranks are wrong, the key/value pools differ
    ///   in shape, or the combined pool's second axis is not 2.
    /// - [`Error::ShapeMismatch`] if a buffer holds fewer or more bytes than
    ///   its shape describes.
    /// - [`Error::DtypeMismatch`] if the key and value pools differ in dtype.
    /// - [`Error::InvalidShape`] if any page dimension is zero.
    pub fn geometry(&self, layout: KvLayout) -> Result<PageGeometry> {
        match self {
            Self::Separate { k, v } => {
                if k.ndim() != 4 {
                    return Err(Error::ShapeMismatch {
                        expected: with_pages(layout, &[]),
                        got: k.shape().to_vec(),
                    });
                }
                if v.shape() != k.shape() {
                    return Err(Error::ShapeMismatch {
                        expected: k.shape().to_vec(),
                        got: v.shape().to_vec(),
                    });
                }
                if v.dtype() != k.dtype() {
                    return Err(Error::DtypeMismatch {
                        expected: k.dtype().to_string(),
                        got: v.dtype().to_string(),
                    });
                }
                check_byte_len(&**k)?;
                check_byte_len(&**v)?;
                PageGeometry::from_page_shape(k.shape(), k.dtype(), layout)
            }
            Self::Combined(kv) => {
                let shape = kv.shape();
                if shape.len() != 5 || shape[1] != 2 {
                    return Err(Error::ShapeMismatch {
                        expected: with_pages(layout, &[2]),
                        got: shape.to_vec(),
                    });
                }
                check_byte_len(&**kv)?;
                PageGeometry::from_page_shape(shape, kv.dtype(), layout)
            }
        }
    }
}

impl<'a, C: TensorMut> PagedKvCache<'a, C> {
    /// Split the buffers into per-page key and value slices.
    ///
    /// # Errors
    /// Same as [`geometry`](Self::geometry).
    pub fn into_pools(self, layout: KvLayout) -> Result<PagePools<'a>> {
        let geometry = self.geometry(layout)?;
        let page_bytes = geometry.page_bytes();
        let pages: Vec<Option<PagePair<'a>>> = match self {
            Self::Separate { k, v } => k
                .as_bytes_mut()
                .chunks_exact_mut(page_bytes)
                .zip(v.as_bytes_mut().chunks_exact_mut(page_bytes))
                .map(|(key, value)| Some(PagePair { key, value }))
                .collect(),
            Self::Combined(kv) => kv
                .as_bytes_mut()
                .chunks_exact_mut(2 * page_bytes)
                .map(|both| {
                    let (key, value) = both.split_at_mut(page_bytes);
                    Some(PagePair { key, value })
                })
                .collect(),
        };
        Ok(PagePools { geometry, pages })
    }
}

/// Symbolic expected shape for error messages; `0` marks a free dimension.
fn with_pages(layout: KvLayout, extra: &[usize]) -> Vec<usize> {
    let mut shape = vec![0];
    shape.extend_from_slice(extra);
    shape.extend_from_slice(&layout.page_shape(0, 0, 0));
    shape
}

/// Key and value bytes of one physical page.
#[derive(Debug)]
pub struct PagePair<'a> {
    pub key: &'a mut [u8],
    pub value: &'a mut [u8],
}

/// Uniform view over a cache: one [`PagePair`] per physical page.
#[derive(Debug)]
pub struct PagePools<'a> {
    geometry: PageGeometry,
    pages: Vec<Option<PagePair<'a>>>,
}

impl<'a> PagePools<'a> {
    #[cfg(test)]
    pub(crate) fn from_pages(geometry: PageGeometry, pages: Vec<PagePair<'a>>) -> Self {
        Self {
            geometry,
            pages: pages.into_iter().map(Some).collect(),
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Number of pages in the view.
    #[must_use]
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Hand out the pages a plan writes to, each paired with its writes.
    ///
    /// Every page is handed out at most once, so the returned slices are
    /// disjoint and can be filled independently.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] if a planned page is outside the
    /// view or was already taken.
    pub fn take_pages<'p>(
        &mut self,
        plan: &'p AppendPlan,
    ) -> Result<Vec<(&'p PageWrites, PagePair<'a>)>> {
        plan.page_writes()
            .iter()
            .map(|writes| {
                self.pages
                    .get_mut(writes.page)
                    .and_then(Option::take)
                    .map(|pair| (writes, pair))
                    .ok_or_else(|| {
                        Error::IndexOutOfRange(format!(
                            "page {} is not available in a cache of {} pages",
                            writes.page,
                            self.pages.len()
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    struct HostBuf {
        shape: Vec<usize>,
        dtype: DType,
        data: Vec<u8>,
    }

    impl HostBuf {
        fn new(shape: &[usize], dtype: DType) -> Self {
            let numel: usize = shape.iter().product();
            Self {
                shape: shape.to_vec(),
                dtype,
                data: vec![0; numel * dtype.size_in_bytes()],
            }
        }
    }

    impl Tensor for HostBuf {
        fn shape(&self) -> &[usize] {
            &self.shape
        }
        fn dtype(&self) -> DType {
            self.dtype
        }
        fn as_bytes(&self) -> &[u8] {
            &self.data
        }
    }

    impl TensorMut for HostBuf {
        fn as_bytes_mut(&mut self) -> &mut [u8] {
            &mut self.data
        }
    }

    #[test]
    fn separate_geometry() {
        let mut k = HostBuf::new(&[10, 4, 2, 8], DType::F16);
        let mut v = HostBuf::new(&[10, 4, 2, 8], DType::F16);
        let cache = PagedKvCache::Separate { k: &mut k, v: &mut v };
        let geom = cache.geometry(KvLayout::Nhd).unwrap();
        assert_eq!(geom.max_num_pages, 10);
        assert_eq!(geom.page_size, 4);
        assert_eq!(geom.num_kv_heads, 2);
        assert_eq!(geom.head_dim, 8);
        assert_eq!(geom.vector_bytes(), 16);
        assert_eq!(geom.row_bytes(), 32);
        assert_eq!(geom.page_bytes(), 128);

        // The same buffers read as HND swap slot and head extents
        let geom = cache.geometry(KvLayout::Hnd).unwrap();
        assert_eq!((geom.page_size, geom.num_kv_heads), (2, 4));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut k = HostBuf::new(&[2, 4, 1, 2], DType::F32);
        let mut v = HostBuf::new(&[2, 4, 1, 2], DType::F32);
        v.data.truncate(v.data.len() - 4);
        let cache = PagedKvCache::Separate { k: &mut k, v: &mut v };
        assert!(matches!(
            cache.geometry(KvLayout::Nhd),
            Err(Error::ShapeMismatch { .. })
        ));

        let mut kv = HostBuf::new(&[2, 2, 4, 1, 2], DType::F32);
        kv.data.truncate(32);
        assert!(matches!(
            PagedKvCache::Combined(&mut kv).into_pools(KvLayout::Nhd),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn combined_geometry_and_split() {
        let mut kv = HostBuf::new(&[3, 2, 2, 4, 1], DType::F32);
        let cache = PagedKvCache::Combined(&mut kv);
        let pools = cache.into_pools(KvLayout::Hnd).unwrap();
        let geom = *pools.geometry();
        assert_eq!((geom.page_size, geom.num_kv_heads, geom.head_dim), (4, 2, 1));
        assert_eq!(pools.num_pages(), 3);
        assert_eq!(geom.page_bytes(), 32);
    }

    #[test]
    fn combined_key_and_value_halves_are_interleaved_per_page() {
        let mut kv = HostBuf::new(&[2, 2, 1, 1, 1], DType::F32);
        {
            let cache = PagedKvCache::Combined(&mut kv);
            let mut pools = cache.into_pools(KvLayout::Nhd).unwrap();
            for page in &mut pools.pages {
                let pair = page.as_mut().unwrap();
                pair.key.fill(1);
                pair.value.fill(2);
            }
        }
        // [page0.k, page0.v, page1.k, page1.v], 4 bytes each
        let expected: Vec<u8> = [1u8, 2, 1, 2]
            .iter()
            .flat_map(|&b| std::iter::repeat(b).take(4))
            .collect();
        assert_eq!(kv.data, expected);
    }

    #[test]
    fn rejects_wrong_rank() {
        let mut k = HostBuf::new(&[4, 2, 8], DType::F32);
        let mut v = HostBuf::new(&[4, 2, 8], DType::F32);
        let cache = PagedKvCache::Separate { k: &mut k, v: &mut v };
        assert!(matches!(
            cache.geometry(KvLayout::Nhd),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_key_value_shape_mismatch() {
        let mut k = HostBuf::new(&[4, 4, 2, 8], DType::F32);
        let mut v = HostBuf::new(&[5, 4, 2, 8], DType::F32);
        let cache = PagedKvCache::Separate { k: &mut k, v: &mut v };
        assert!(matches!(
            cache.geometry(KvLayout::Nhd),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_key_value_dtype_mismatch() {
        let mut k = HostBuf::new(&[4, 4, 2, 8], DType::F16);
        let mut v = HostBuf::new(&[4, 4, 2, 8], DType::BF16);
        let cache = PagedKvCache::Separate { k: &mut k, v: &mut v };
        assert!(matches!(
            cache.geometry(KvLayout::Nhd),
            Err(Error::DtypeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_combined_without_kv_axis() {
        let mut kv = HostBuf::new(&[4, 3, 4, 2, 8], DType::F32);
        let cache = PagedKvCache::Combined(&mut kv);
        let err = cache.geometry(KvLayout::Nhd).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    }

    #[test]
    fn rejects_zero_page_size() {
        let mut k = HostBuf::new(&[4, 0, 2, 8], DType::F32);
        let mut v = HostBuf::new(&[4, 0, 2, 8], DType::F32);
        let cache = PagedKvCache::Separate { k: &mut k, v: &mut v };
        assert!(matches!(
            cache.geometry(KvLayout::Nhd),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn vector_byte_offsets_follow_layout() {
        let geom = PageGeometry {
            max_num_pages: 1,
            page_size: 4,
            num_kv_heads: 2,
            head_dim: 3,
            dtype: DType::BF16,
            layout: KvLayout::Hnd,
        };
        assert_eq!(geom.vector_byte_offset(1, 1), (4 + 1) * 3 * 2);
        let nhd = PageGeometry {
            layout: KvLayout::Nhd,
            ..geom
        };
        assert_eq!(nhd.vector_byte_offset(1, 1), (2 + 1) * 3 * 2);
    }
}
