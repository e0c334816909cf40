//! Heap-on-Node: a node's blocks viewed as numbered allocation slots.
//!
//! # Layout
//!
//! Every block starts with a header whose first field, `ibHnpm`, points at the
//! block's page map:
//!
//! | Block index                         | Header                                   |
//! |-------------------------------------|------------------------------------------|
//! | 0                                   | HNHDR {ibHnpm, bSig, bClientSig, hidUserRoot, rgbFillLevel} |
//! | 8, 136, 264, … (`(i - 8) % 128 == 0`) | HNBITMAPHDR {ibHnpm, rgbFillLevel[64]}   |
//! | all others                          | HNPAGEHDR {ibHnpm}                       |
//!
//! The page map is `{cAlloc, cFree, rgibAlloc[cAlloc + 1]}`; slot `i` of the
//! block spans `rgibAlloc[i]..rgibAlloc[i + 1]`.
//!
//! # Heap ids
//!
//! A [`Hid`] names a block and a 1-based slot within it.  Lookups of ids that
//! fall outside the heap return `None`: callers probe optional ids routinely.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use tracing::{debug, warn};

use crate::error::{PstError, Result};
use crate::fields::{field, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::ids::Bid;
use crate::ndb::NodeDatabase;
use crate::options::DecodeOptions;

/// `bSig` of the first heap block.
pub const HN_SIGNATURE: u8 = 0xEC;

const HNHDR: &[Field] = &[
    field("ibHnpm", K::U16),
    field("bSig", K::U8),
    field("bClientSig", K::U8),
    field("hidUserRoot", K::U32),
    field("rgbFillLevel", K::Skip(4)),
];

// ── Client signature ─────────────────────────────────────────────────────────

/// What the heap holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientSignature {
    TableContext,
    BTreeOnHeap,
    PropertyContext,
    /// Defined by the format but without a decoder here.
    Reserved(u8),
    Unknown(u8),
}

impl ClientSignature {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x7c => ClientSignature::TableContext,
            0xb5 => ClientSignature::BTreeOnHeap,
            0xbc => ClientSignature::PropertyContext,
            0x6c | 0x8c | 0x9c | 0xa5 | 0xac | 0xcc => ClientSignature::Reserved(b),
            other => ClientSignature::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ClientSignature::TableContext => 0x7c,
            ClientSignature::BTreeOnHeap => 0xb5,
            ClientSignature::PropertyContext => 0xbc,
            ClientSignature::Reserved(b) | ClientSignature::Unknown(b) => b,
        }
    }
}

impl fmt::Display for ClientSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientSignature::TableContext => f.write_str("table context"),
            ClientSignature::BTreeOnHeap => f.write_str("b-tree-on-heap"),
            ClientSignature::PropertyContext => f.write_str("property context"),
            ClientSignature::Reserved(b) => write!(f, "reserved ({b:#04x})"),
            ClientSignature::Unknown(b) => write!(f, "unknown ({b:#04x})"),
        }
    }
}

// ── HID ──────────────────────────────────────────────────────────────────────

/// Heap id: `{type:5 = 0, index:11 (1-based), block:16}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Hid(u32);

impl Hid {
    pub const fn from_raw(raw: u32) -> Self {
        Hid(raw)
    }

    pub fn new(block: u16, index: u16) -> Self {
        Hid((u32::from(block) << 16) | (u32::from(index & 0x7ff) << 5))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Always zero for a heap id; anything else is a node id.
    pub fn hid_type(self) -> u8 {
        (self.0 & 0x1f) as u8
    }

    pub fn index(self) -> u16 {
        ((self.0 >> 5) & 0x7ff) as u16
    }

    pub fn block(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for Hid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ── Heap ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Slot {
    block: usize,
    range: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct HeapOnNode {
    blocks: Vec<Vec<u8>>,
    slots: Vec<Slot>,
    /// Index into `slots` of each block's first slot, plus a final sentinel.
    first_slot: Vec<usize>,
    client_signature: ClientSignature,
    user_root: Hid,
}

impl HeapOnNode {
    /// Build the heap stored under a node's data BID.
    pub fn read(ndb: &NodeDatabase, bid: Bid) -> Result<Self> {
        Self::from_blocks(ndb.read_blocks(bid)?, ndb.options())
    }

    pub fn from_blocks(blocks: Vec<Vec<u8>>, options: &DecodeOptions) -> Result<Self> {
        let first = blocks.first().ok_or_else(|| PstError::corrupt("heap has no blocks"))?;
        let hdr = FieldBag::read(&first[..], HNHDR, FormatVariant::Unicode)?;

        let sig = hdr.u8("bSig")?;
        if sig != HN_SIGNATURE {
            if options.strict_heap_nodes {
                return Err(PstError::NotHeapNode(sig));
            }
            warn!(signature = sig, "heap block signature mismatch, continuing");
        }
        let client_signature = ClientSignature::from_byte(hdr.u8("bClientSig")?);
        if let ClientSignature::Unknown(b) = client_signature {
            if options.strict_heap_nodes {
                return Err(PstError::UnknownClientSignature(b));
            }
        }
        let user_root = Hid::from_raw(hdr.u32("hidUserRoot")?);

        let mut slots = Vec::new();
        let mut first_slot = Vec::with_capacity(blocks.len() + 1);
        for (i, block) in blocks.iter().enumerate() {
            first_slot.push(slots.len());
            let ib_hnpm = page_map_offset(block, i, hdr.u16("ibHnpm")?)?;
            for range in read_page_map(block, ib_hnpm, i)? {
                slots.push(Slot { block: i, range });
            }
        }
        first_slot.push(slots.len());

        debug!(blocks = blocks.len(), slots = slots.len(), client = %client_signature, "built heap");
        Ok(Self { blocks, slots, first_slot, client_signature, user_root })
    }

    pub fn client_signature(&self) -> ClientSignature {
        self.client_signature
    }

    /// Fail with a benign error unless the heap holds `expected`.
    pub fn expect_client(&self, expected: ClientSignature) -> Result<()> {
        if self.client_signature != expected {
            return Err(PstError::UnexpectedClientSignature { expected, found: self.client_signature });
        }
        Ok(())
    }

    pub fn user_root(&self) -> Hid {
        self.user_root
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_index(&self, hid: Hid) -> Option<usize> {
        if hid.hid_type() != 0 || hid.index() == 0 {
            return None;
        }
        let block = usize::from(hid.block());
        let start = *self.first_slot.get(block)?;
        let end = *self.first_slot.get(block + 1)?;
        let slot = start + usize::from(hid.index()) - 1;
        (slot < end).then_some(slot)
    }

    pub fn is_valid(&self, hid: Hid) -> bool {
        self.slot_index(hid).is_some()
    }

    /// Bytes of the slot named by `hid`, or `None` if there is no such slot.
    pub fn heap_data(&self, hid: Hid) -> Option<&[u8]> {
        let slot = &self.slots[self.slot_index(hid)?];
        self.blocks[slot.block].get(slot.range.clone())
    }
}

fn page_map_offset(block: &[u8], index: usize, first: u16) -> Result<usize> {
    if index == 0 {
        return Ok(usize::from(first));
    }
    // HNBITMAPHDR and HNPAGEHDR both open with ibHnpm.
    let mut reader = block;
    Ok(usize::from(reader.read_u16::<LittleEndian>()?))
}

/// Whether block `index` of a heap carries the bitmap header.
pub fn has_bitmap_header(index: usize) -> bool {
    index >= 8 && (index - 8) % 128 == 0
}

fn read_page_map(block: &[u8], ib_hnpm: usize, index: usize) -> Result<Vec<Range<usize>>> {
    let corrupt = || PstError::corrupt(format!("heap block {index} page map at {ib_hnpm} is out of bounds"));
    let mut reader = block.get(ib_hnpm..).ok_or_else(corrupt)?;
    let alloc = usize::from(reader.read_u16::<LittleEndian>().map_err(|_| corrupt())?);
    let _free = reader.read_u16::<LittleEndian>().map_err(|_| corrupt())?;
    let offsets = (0..=alloc)
        .map(|_| reader.read_u16::<LittleEndian>().map(usize::from))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|_| corrupt())?;

    offsets
        .windows(2)
        .map(|w| {
            if w[0] > w[1] || w[1] > ib_hnpm {
                Err(PstError::corrupt(format!(
                    "heap block {index} slot {}..{} is invalid",
                    w[0], w[1]
                )))
            } else {
                Ok(w[0]..w[1])
            }
        })
        .collect()
}
