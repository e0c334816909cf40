//! Subnode B-tree: a node's private table of auxiliary nodes.
//!
//! Unlike the B-tree-on-heap, every level lives in ordinary (internal) blocks.
//! The block starts with `{btype = 0x02, cLevel, cEnt, [dwPadding]}` and is
//! followed by `cEnt` leaf (SLENTRY) or intermediate (SIENTRY) records.  An
//! SIENTRY names another subnode block one level down.

use serde::Serialize;
use tracing::debug;

use crate::block::BLOCK_TYPE_SUBNODE;
use crate::error::{PstError, Result};
use crate::fields::{field, record_size, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::ids::{Bid, Nid};
use crate::ndb::NodeDatabase;

const HEADER_ANSI: &[Field] = &[
    field("btype", K::U8),
    field("cLevel", K::U8),
    field("cEnt", K::U16),
];

const HEADER_WIDE: &[Field] = &[
    field("btype", K::U8),
    field("cLevel", K::U8),
    field("cEnt", K::U16),
    field("dwPadding", K::Skip(4)),
];

const SL_ANSI: &[Field] = &[
    field("nid", K::Nid),
    field("bidData", K::Bid),
    field("bidSub", K::Bid),
];

const SL_WIDE: &[Field] = &[
    field("nid", K::Nid),
    field("nidPad", K::Skip(4)),
    field("bidData", K::Bid),
    field("bidSub", K::Bid),
];

const SI_ANSI: &[Field] = &[field("nid", K::Nid), field("bid", K::Bid)];

const SI_WIDE: &[Field] = &[
    field("nid", K::Nid),
    field("nidPad", K::Skip(4)),
    field("bid", K::Bid),
];

fn layouts(variant: FormatVariant) -> (&'static [Field], &'static [Field], &'static [Field]) {
    if variant.is_wide() {
        (HEADER_WIDE, SL_WIDE, SI_WIDE)
    } else {
        (HEADER_ANSI, SL_ANSI, SI_ANSI)
    }
}

/// One SLENTRY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubnodeEntry {
    pub nid: Nid,
    pub data: Bid,
    pub subnode: Bid,
}

#[derive(Debug, Clone, Default)]
pub struct SubnodeTree {
    entries: Vec<SubnodeEntry>,
}

impl SubnodeTree {
    /// Read the tree rooted at `bid`.  A null BID is an empty tree.
    pub fn read(ndb: &NodeDatabase, bid: Bid) -> Result<Self> {
        let mut entries = Vec::new();
        if !bid.is_null() {
            load(ndb, bid, None, &mut entries)?;
        }
        debug!(%bid, entries = entries.len(), "read subnode tree");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubnodeEntry> {
        self.entries.iter()
    }

    pub fn find(&self, nid: Nid) -> Option<&SubnodeEntry> {
        self.entries.iter().find(|e| e.nid == nid)
    }

    /// The subnode tree nested under entry `nid`, if it has one.
    pub fn child(&self, ndb: &NodeDatabase, nid: Nid) -> Result<Option<SubnodeTree>> {
        match self.find(nid) {
            Some(entry) if !entry.subnode.is_null() => Ok(Some(SubnodeTree::read(ndb, entry.subnode)?)),
            _ => Ok(None),
        }
    }

    /// Data stored for subnode `nid`, data trees included.
    pub fn read_data(&self, ndb: &NodeDatabase, nid: Nid) -> Result<Vec<u8>> {
        self.read_blocks(ndb, nid).map(|blocks| blocks.concat())
    }

    pub fn read_blocks(&self, ndb: &NodeDatabase, nid: Nid) -> Result<Vec<Vec<u8>>> {
        let entry = self.find(nid).ok_or(PstError::NodeNotFound(nid))?;
        if entry.data.is_null() {
            return Err(PstError::NullDataBlock(nid));
        }
        ndb.read_blocks(entry.data)
    }
}

fn load(ndb: &NodeDatabase, bid: Bid, expected_level: Option<u8>, out: &mut Vec<SubnodeEntry>) -> Result<()> {
    let variant = ndb.variant();
    let (header_layout, sl, si) = layouts(variant);
    let data = ndb.read_block(bid)?;
    let header = FieldBag::read(&data[..], header_layout, variant)?;

    let btype = header.u8("btype")?;
    if btype != BLOCK_TYPE_SUBNODE {
        return Err(PstError::corrupt(format!("subnode block {bid} has type {btype:#04x}")));
    }
    let level = header.u8("cLevel")?;
    if let Some(expected) = expected_level {
        if level != expected {
            return Err(PstError::corrupt(format!(
                "subnode block {bid} at level {level}, expected {expected}"
            )));
        }
    }

    let count = usize::from(header.u16("cEnt")?);
    let entry_layout = if level == 0 { sl } else { si };
    let start = record_size(header_layout, variant);
    let size = record_size(entry_layout, variant);
    let body = data
        .get(start..start + count * size)
        .ok_or_else(|| PstError::corrupt(format!("subnode block {bid} is too short for {count} entries")))?;

    for record in body.chunks_exact(size) {
        let bag = FieldBag::read(record, entry_layout, variant)?;
        if level == 0 {
            out.push(SubnodeEntry {
                nid: bag.nid("nid")?,
                data: bag.bid("bidData")?,
                subnode: bag.bid("bidSub")?,
            });
        } else {
            load(ndb, bag.bid("bid")?, Some(level - 1), out)?;
        }
    }
    Ok(())
}
