//! On-disk layout variants.
//!
//! The variant is read once from the header's `wVer` field and passed by value
//! to every decoder whose field widths depend on it.
//!
//! | Variant     | wVer   | BID/IB | Page  | Block align | Max block |
//! |-------------|--------|--------|-------|-------------|-----------|
//! | `Ansi`      | 14, 15 | 4 B    | 512   | 64          | 8192      |
//! | `Unicode`   | ≥ 23   | 8 B    | 512   | 64          | 8192      |
//! | `Unicode4k` | 36     | 8 B    | 4096  | 512         | 65535     |

use serde::Serialize;
use std::fmt;

use crate::error::{PstError, Result};

pub const VER_ANSI_MIN: u16 = 14;
pub const VER_ANSI_MAX: u16 = 15;
pub const VER_UNICODE: u16 = 23;
pub const VER_UNICODE_4K: u16 = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FormatVariant {
    /// 32-bit identifiers and offsets.
    Ansi,
    /// 64-bit identifiers and offsets.
    Unicode,
    /// 64-bit, 4 KiB pages, compressed blocks (OST 2013 and later).
    Unicode4k,
}

impl FormatVariant {
    pub fn from_version(w_ver: u16) -> Result<Self> {
        match w_ver {
            VER_ANSI_MIN | VER_ANSI_MAX => Ok(FormatVariant::Ansi),
            VER_UNICODE_4K => Ok(FormatVariant::Unicode4k),
            v if v >= VER_UNICODE => Ok(FormatVariant::Unicode),
            v => Err(PstError::UnknownVersion(v)),
        }
    }

    /// The canonical `wVer` a writer of this variant stores.
    pub fn version(self) -> u16 {
        match self {
            FormatVariant::Ansi => VER_ANSI_MAX,
            FormatVariant::Unicode => VER_UNICODE,
            FormatVariant::Unicode4k => VER_UNICODE_4K,
        }
    }

    #[inline]
    pub fn is_wide(self) -> bool {
        !matches!(self, FormatVariant::Ansi)
    }

    #[inline]
    pub fn bid_size(self) -> usize {
        if self.is_wide() { 8 } else { 4 }
    }

    #[inline]
    pub fn ib_size(self) -> usize {
        self.bid_size()
    }

    #[inline]
    pub fn bref_size(self) -> usize {
        self.bid_size() + self.ib_size()
    }

    // ── Paged B-tree pages ───────────────────────────────────────────────────

    pub fn page_size(self) -> usize {
        match self {
            FormatVariant::Unicode4k => 4096,
            _ => 512,
        }
    }

    /// Bytes available for packed entries at the start of a page.
    pub fn page_entry_area(self) -> usize {
        match self {
            FormatVariant::Ansi => 496,
            FormatVariant::Unicode => 488,
            FormatVariant::Unicode4k => 4056,
        }
    }

    pub fn page_trailer_size(self) -> usize {
        match self {
            FormatVariant::Ansi => 12,
            _ => 16,
        }
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    pub fn block_alignment(self) -> usize {
        match self {
            FormatVariant::Unicode4k => 512,
            _ => 64,
        }
    }

    pub fn max_block_size(self) -> usize {
        match self {
            FormatVariant::Unicode4k => 65535,
            _ => 8192,
        }
    }

    pub fn block_trailer_size(self) -> usize {
        match self {
            FormatVariant::Ansi => 12,
            FormatVariant::Unicode => 16,
            FormatVariant::Unicode4k => 24,
        }
    }

    /// Largest payload a single data block can carry.
    pub fn max_block_data(self) -> usize {
        self.max_block_size() - self.block_trailer_size()
    }

    /// On-disk footprint of a block whose payload is `cb` bytes.
    pub fn block_size(self, cb: usize) -> usize {
        let align = self.block_alignment();
        (cb + self.block_trailer_size() + align - 1) / align * align
    }

    pub fn name(self) -> &'static str {
        match self {
            FormatVariant::Ansi => "ANSI",
            FormatVariant::Unicode => "Unicode",
            FormatVariant::Unicode4k => "Unicode-4K",
        }
    }
}

impl fmt::Display for FormatVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
