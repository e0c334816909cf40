use serde::Serialize;

use crate::block::PageType;
use crate::error::Result;
use crate::fields::{field, record_size, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::ids::{read_width, Bid, Bref, Nid};

/// A leaf record of a paged B-tree.
pub trait LeafEntry: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Page type every page of this tree must carry.
    const PAGE_TYPE: PageType;

    fn layout(variant: FormatVariant) -> &'static [Field];

    fn from_fields(bag: &FieldBag) -> Result<Self>;

    fn key(&self) -> u64;

    fn read(bytes: &[u8], variant: FormatVariant) -> Result<Self> {
        let bag = FieldBag::read(bytes, Self::layout(variant), variant)?;
        Self::from_fields(&bag)
    }

    fn size(variant: FormatVariant) -> usize {
        record_size(Self::layout(variant), variant)
    }
}

// ── Intermediate ─────────────────────────────────────────────────────────────

/// Intermediate record: lowest key reachable through `child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtEntry {
    pub key: u64,
    pub child: Bref,
}

impl BtEntry {
    pub fn size(variant: FormatVariant) -> usize {
        variant.bid_size() + variant.bref_size()
    }

    pub fn read(mut bytes: &[u8], variant: FormatVariant) -> Result<Self> {
        let key = read_width(&mut bytes, variant)?;
        let child = Bref::read(&mut bytes, variant)?;
        Ok(Self { key, child })
    }
}

// ── Block Index leaf ─────────────────────────────────────────────────────────

const BBT_NARROW: &[Field] = &[
    field("BREF", K::Bref),
    field("cb", K::U16),
    field("cRef", K::U16),
];

const BBT_4K: &[Field] = &[
    field("BREF", K::Bref),
    field("cb", K::U16),
    field("cbInflated", K::U16),
    field("cRef", K::U16),
];

/// Where a block lives and how big it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BbtEntry {
    pub bref: Bref,
    /// Bytes stored on disk, before the trailer.
    pub size: u16,
    /// Bytes after inflation; equal to `size` unless the block is compressed.
    pub inflated_size: u16,
    pub ref_count: u16,
}

impl LeafEntry for BbtEntry {
    const PAGE_TYPE: PageType = PageType::BlockIndex;

    fn layout(variant: FormatVariant) -> &'static [Field] {
        match variant {
            FormatVariant::Unicode4k => BBT_4K,
            _ => BBT_NARROW,
        }
    }

    fn from_fields(bag: &FieldBag) -> Result<Self> {
        let size = bag.u16("cb")?;
        Ok(Self {
            bref: bag.bref("BREF")?,
            size,
            inflated_size: bag.u16("cbInflated").unwrap_or(size),
            ref_count: bag.u16("cRef")?,
        })
    }

    fn key(&self) -> u64 {
        self.bref.bid.key()
    }
}

impl BbtEntry {
    pub fn bid(&self) -> Bid {
        self.bref.bid
    }
}

// ── Node Index leaf ──────────────────────────────────────────────────────────

const NBT_ANSI: &[Field] = &[
    field("nid", K::Nid),
    field("bidData", K::Bid),
    field("bidSub", K::Bid),
    field("nidParent", K::Nid),
];

const NBT_WIDE: &[Field] = &[
    field("nid", K::Nid),
    field("nidPad", K::Skip(4)),
    field("bidData", K::Bid),
    field("bidSub", K::Bid),
    field("nidParent", K::Nid),
];

/// A node: its data block, optional subnode tree and parent folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NbtEntry {
    pub nid: Nid,
    pub data: Bid,
    pub subnode: Bid,
    pub parent: Nid,
}

impl LeafEntry for NbtEntry {
    const PAGE_TYPE: PageType = PageType::NodeIndex;

    fn layout(variant: FormatVariant) -> &'static [Field] {
        if variant.is_wide() { NBT_WIDE } else { NBT_ANSI }
    }

    fn from_fields(bag: &FieldBag) -> Result<Self> {
        Ok(Self {
            nid: bag.nid("nid")?,
            data: bag.bid("bidData")?,
            subnode: bag.bid("bidSub")?,
            parent: bag.nid("nidParent")?,
        })
    }

    fn key(&self) -> u64 {
        self.nid.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_sizes() {
        assert_eq!(BbtEntry::size(FormatVariant::Ansi), 12);
        assert_eq!(BbtEntry::size(FormatVariant::Unicode), 20);
        assert_eq!(BbtEntry::size(FormatVariant::Unicode4k), 22);
        assert_eq!(NbtEntry::size(FormatVariant::Ansi), 16);
        assert_eq!(NbtEntry::size(FormatVariant::Unicode), 28);
        assert_eq!(BtEntry::size(FormatVariant::Ansi), 12);
        assert_eq!(BtEntry::size(FormatVariant::Unicode), 24);
    }

    #[test]
    fn nbt_wide_layout() {
        let mut b = Vec::new();
        b.extend_from_slice(&0x122u32.to_le_bytes());
        b.extend_from_slice(&[0; 4]);
        b.extend_from_slice(&0x40u64.to_le_bytes());
        b.extend_from_slice(&0x0u64.to_le_bytes());
        b.extend_from_slice(&0x122u32.to_le_bytes());
        let e = NbtEntry::read(&b, FormatVariant::Unicode).unwrap();
        assert_eq!(e.nid, Nid::ROOT_FOLDER);
        assert_eq!(e.data, Bid::from_raw(0x40));
        assert!(e.subnode.is_null());
        assert_eq!(e.key(), 0x122);
    }

    #[test]
    fn bbt_inflated_defaults_to_stored_size() {
        let mut b = Vec::new();
        b.extend_from_slice(&0x21u32.to_le_bytes());
        b.extend_from_slice(&0x2000u32.to_le_bytes());
        b.extend_from_slice(&100u16.to_le_bytes());
        b.extend_from_slice(&2u16.to_le_bytes());
        let e = BbtEntry::read(&b, FormatVariant::Ansi).unwrap();
        assert_eq!(e.size, 100);
        assert_eq!(e.inflated_size, 100);
        assert_eq!(e.ref_count, 2);
        assert_eq!(e.key(), 0x20);
    }
}
