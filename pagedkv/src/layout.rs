//! KV page layouts
//!
//! A page holds `page_size` token slots for `num_kv_heads` heads, each a
//! contiguous `head_dim` vector. The layout only fixes the order of the slot
//! and head axes inside a page:
//!
//! - `NHD`: `(page_size, num_kv_heads, head_dim)`
//! - `HND`: `(num_kv_heads, page_size, head_dim)`
//!
//! It never changes which slot is addressed.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Axis order of a KV cache page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KvLayout {
    /// Slot-major: `[page_size, num_kv_heads, head_dim]`
    #[default]
    Nhd,
    /// Head-major: `[num_kv_heads, page_size, head_dim]`
    Hnd,
}

impl KvLayout {
    /// Resolve an integer layout code (`0` = NHD, `1` = HND).
    ///
    /// # Errors
    /// Returns [`Error::InvalidLayout`] for any other code.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Nhd),
            1 => Ok(Self::Hnd),
            other => Err(Error::InvalidLayout(other.to_string())),
        }
    }

    /// Integer code of this layout.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Nhd => 0,
            Self::Hnd => 1,
        }
    }

    /// Element offset of the `head_dim` vector for `(slot, head)` within a page.
    #[must_use]
    pub const fn vector_offset(
        self,
        page_size: usize,
        num_kv_heads: usize,
        head_dim: usize,
        slot: usize,
        head: usize,
    ) -> usize {
        match self {
            Self::Nhd => (slot * num_kv_heads + head) * head_dim,
            Self::Hnd => (head * page_size + slot) * head_dim,
        }
    }

    /// Shape of a single page under this layout.
    #[must_use]
    pub const fn page_shape(
        self,
        page_size: usize,
        num_kv_heads: usize,
        head_dim: usize,
    ) -> [usize; 3] {
        match self {
            Self::Nhd => [page_size, num_kv_heads, head_dim],
            Self::Hnd => [num_kv_heads, page_size, head_dim],
        }
    }

    /// Decode `(page_size, num_kv_heads, head_dim)` from the trailing three
    /// dimensions of a page-shaped tensor.
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] if `shape` has fewer than three dimensions.
    pub fn page_dims(self, shape: &[usize]) -> Result<(usize, usize, usize)> {
        let [a, b, head_dim] = match shape {
            [.., a, b, c] => [*a, *b, *c],
            _ => {
                return Err(Error::InvalidShape(format!(
                    "page tensor must have at least 3 dims, got {shape:?}"
                )))
            }
        };
        Ok(match self {
            Self::Nhd => (a, b, head_dim),
            Self::Hnd => (b, a, head_dim),
        })
    }
}

impl FromStr for KvLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NHD" => Ok(Self::Nhd),
            "HND" => Ok(Self::Hnd),
            other => Err(Error::InvalidLayout(other.to_string())),
        }
    }
}

impl fmt::Display for KvLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nhd => write!(f, "NHD"),
            Self::Hnd => write!(f, "HND"),
        }
    }
}
