//! One paged B-tree page.
//!
//! ```text
//! ┌──────────── entry area ────────────┬── meta ──┬─ trailer ─┐
//! │ cEnt records, cbEnt bytes apart    │ cEnt ... │           │
//! └────────────────────────────────────┴──────────┴───────────┘
//! ```
//!
//! The meta block is {cEnt, cEntMax, cbEnt, cLevel}; the counters are one byte
//! wide except on 4K pages where cEnt and cEntMax take two.

use tracing::warn;

use crate::block::BlockStore;
use crate::error::{PstError, Result};
use crate::fields::{field, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::ids::Bref;

use super::entry::{BtEntry, LeafEntry};

const META_NARROW: &[Field] = &[
    field("cEnt", K::U8),
    field("cEntMax", K::U8),
    field("cbEnt", K::U8),
    field("cLevel", K::U8),
];

const META_4K: &[Field] = &[
    field("cEnt", K::U16),
    field("cEntMax", K::U16),
    field("cbEnt", K::U8),
    field("cLevel", K::U8),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub count: usize,
    pub max: usize,
    pub entry_size: usize,
    pub level: u8,
}

impl PageMeta {
    pub fn layout(variant: FormatVariant) -> &'static [Field] {
        match variant {
            FormatVariant::Unicode4k => META_4K,
            _ => META_NARROW,
        }
    }

    pub fn read(page: &[u8], variant: FormatVariant) -> Result<Self> {
        let at = variant.page_entry_area();
        let bytes = page.get(at..).ok_or_else(|| PstError::corrupt("page shorter than its entry area"))?;
        let bag = FieldBag::read(bytes, Self::layout(variant), variant)?;
        Ok(Self {
            count: bag.uint("cEnt")? as usize,
            max: bag.uint("cEntMax")? as usize,
            entry_size: usize::from(bag.u8("cbEnt")?),
            level: bag.u8("cLevel")?,
        })
    }
}

#[derive(Debug, Clone)]
pub enum PageBody<E> {
    Leaves(Vec<E>),
    Branches(Vec<BtEntry>),
}

#[derive(Debug, Clone)]
pub struct Page<E> {
    pub bref: Bref,
    pub level: u8,
    pub body: PageBody<E>,
}

impl<E: LeafEntry> Page<E> {
    /// Read the page at `bref`.  When `expected_level` is given the page must
    /// sit at exactly that level.
    pub fn read(store: &BlockStore, bref: Bref, expected_level: Option<u8>) -> Result<Self> {
        let variant = store.variant();
        let raw = store.read_page(bref, E::PAGE_TYPE)?;
        let meta = PageMeta::read(&raw, variant)?;

        if let Some(level) = expected_level {
            if meta.level != level {
                return Err(PstError::corrupt(format!(
                    "page {bref} is at level {}, expected {level}",
                    meta.level
                )));
            }
        }
        let min_size = if meta.level == 0 { E::size(variant) } else { BtEntry::size(variant) };
        if meta.entry_size < min_size {
            return Err(PstError::corrupt(format!(
                "page {bref} entries are {} bytes, need at least {min_size}",
                meta.entry_size
            )));
        }
        if meta.count * meta.entry_size > variant.page_entry_area() {
            return Err(PstError::corrupt(format!(
                "page {bref} declares {} entries of {} bytes",
                meta.count, meta.entry_size
            )));
        }

        let records = raw[..meta.count * meta.entry_size].chunks_exact(meta.entry_size);
        let body = if meta.level == 0 {
            PageBody::Leaves(records.map(|r| E::read(r, variant)).collect::<Result<Vec<_>>>()?)
        } else {
            PageBody::Branches(records.map(|r| BtEntry::read(r, variant)).collect::<Result<Vec<_>>>()?)
        };

        let page = Page { bref, level: meta.level, body };
        if !page.keys_sorted() {
            warn!(%bref, "page keys are out of order");
        }
        Ok(page)
    }
}

impl<E: LeafEntry> Page<E> {
    fn keys_sorted(&self) -> bool {
        match &self.body {
            PageBody::Leaves(v) => v.windows(2).all(|w| w[0].key() <= w[1].key()),
            PageBody::Branches(v) => v.windows(2).all(|w| w[0].key <= w[1].key),
        }
    }
}

/// The child to descend into: the last one whose key does not exceed `key`.
pub fn choose_child(entries: &[BtEntry], key: u64) -> Option<&BtEntry> {
    entries.iter().take_while(|e| e.key <= key).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{Bid, Ib};

    fn bt(key: u64) -> BtEntry {
        BtEntry { key, child: Bref { bid: Bid::from_raw(key), ib: Ib(0) } }
    }

    #[test]
    fn descent_picks_last_lower_bound() {
        let entries = vec![bt(0x20), bt(0x60), bt(0x100)];
        assert_eq!(choose_child(&entries, 0x1f), None);
        assert_eq!(choose_child(&entries, 0x20).map(|e| e.key), Some(0x20));
        assert_eq!(choose_child(&entries, 0x7f).map(|e| e.key), Some(0x60));
        assert_eq!(choose_child(&entries, 0x1000).map(|e| e.key), Some(0x100));
    }

    #[test]
    fn meta_tail_offsets() {
        let mut page = vec![0u8; 512];
        page[488] = 3;
        page[489] = 20;
        page[490] = 24;
        page[491] = 1;
        let meta = PageMeta::read(&page, FormatVariant::Unicode).unwrap();
        assert_eq!(meta, PageMeta { count: 3, max: 20, entry_size: 24, level: 1 });

        let mut page = vec![0u8; 4096];
        page[4056..4058].copy_from_slice(&300u16.to_le_bytes());
        page[4058..4060].copy_from_slice(&400u16.to_le_bytes());
        page[4060] = 24;
        let meta = PageMeta::read(&page, FormatVariant::Unicode4k).unwrap();
        assert_eq!(meta.count, 300);
        assert_eq!(meta.level, 0);
    }
}
