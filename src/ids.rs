//! Block ids, node ids, byte offsets and block references.
//!
//! All of these are little-endian on disk with variant-dependent widths; the
//! `read` constructors take the [`FormatVariant`] explicitly.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read};

use crate::format::FormatVariant;

// ── Width-dispatched readers ─────────────────────────────────────────────────

pub(crate) fn read_width<R: Read>(reader: &mut R, variant: FormatVariant) -> io::Result<u64> {
    if variant.is_wide() {
        reader.read_u64::<LittleEndian>()
    } else {
        reader.read_u32::<LittleEndian>().map(u64::from)
    }
}

// ── BID ──────────────────────────────────────────────────────────────────────

/// Block identifier.
///
/// Bit 0 is reserved and bit 1 marks an internal block (a data-tree node or a
/// subnode tree block).  The search key clears bit 0 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Bid(u64);

impl Bid {
    pub const NULL: Bid = Bid(0);

    pub const fn from_raw(raw: u64) -> Self {
        Bid(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Value the Block Index is keyed on.
    pub fn key(self) -> u64 {
        self.0 & !1
    }

    pub fn is_internal(self) -> bool {
        self.0 & 2 != 0
    }

    /// The monotonically allocated counter part of the id.
    pub fn id(self) -> u64 {
        self.0 >> 2
    }

    pub fn is_null(self) -> bool {
        self.key() == 0
    }

    /// Key material for the block cipher.
    pub fn crypt_key(self) -> u32 {
        self.key() as u32
    }

    pub fn read<R: Read>(mut reader: R, variant: FormatVariant) -> io::Result<Self> {
        read_width(&mut reader, variant).map(Bid)
    }
}

impl fmt::Display for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ── NID ──────────────────────────────────────────────────────────────────────

/// The 5-bit type tag of a node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NidType {
    Hid,
    Internal,
    NormalFolder,
    SearchFolder,
    NormalMessage,
    Attachment,
    SearchUpdateQueue,
    SearchCriteriaObject,
    AssocMessage,
    ContentsTableIndex,
    ReceiveFolderTable,
    OutgoingQueueTable,
    HierarchyTable,
    ContentsTable,
    AssocContentsTable,
    SearchContentsTable,
    AttachmentTable,
    RecipientTable,
    SearchTableIndex,
    Ltp,
    Other(u8),
}

impl NidType {
    pub fn from_code(code: u8) -> Self {
        match code & 0x1f {
            0x00 => NidType::Hid,
            0x01 => NidType::Internal,
            0x02 => NidType::NormalFolder,
            0x03 => NidType::SearchFolder,
            0x04 => NidType::NormalMessage,
            0x05 => NidType::Attachment,
            0x06 => NidType::SearchUpdateQueue,
            0x07 => NidType::SearchCriteriaObject,
            0x08 => NidType::AssocMessage,
            0x0a => NidType::ContentsTableIndex,
            0x0b => NidType::ReceiveFolderTable,
            0x0c => NidType::OutgoingQueueTable,
            0x0d => NidType::HierarchyTable,
            0x0e => NidType::ContentsTable,
            0x0f => NidType::AssocContentsTable,
            0x10 => NidType::SearchContentsTable,
            0x11 => NidType::AttachmentTable,
            0x12 => NidType::RecipientTable,
            0x13 => NidType::SearchTableIndex,
            0x1f => NidType::Ltp,
            other => NidType::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            NidType::Hid => 0x00,
            NidType::Internal => 0x01,
            NidType::NormalFolder => 0x02,
            NidType::SearchFolder => 0x03,
            NidType::NormalMessage => 0x04,
            NidType::Attachment => 0x05,
            NidType::SearchUpdateQueue => 0x06,
            NidType::SearchCriteriaObject => 0x07,
            NidType::AssocMessage => 0x08,
            NidType::ContentsTableIndex => 0x0a,
            NidType::ReceiveFolderTable => 0x0b,
            NidType::OutgoingQueueTable => 0x0c,
            NidType::HierarchyTable => 0x0d,
            NidType::ContentsTable => 0x0e,
            NidType::AssocContentsTable => 0x0f,
            NidType::SearchContentsTable => 0x10,
            NidType::AttachmentTable => 0x11,
            NidType::RecipientTable => 0x12,
            NidType::SearchTableIndex => 0x13,
            NidType::Ltp => 0x1f,
            NidType::Other(code) => code & 0x1f,
        }
    }
}

/// Node identifier: `(index << 5) | type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Nid(u32);

impl Nid {
    pub const MESSAGE_STORE: Nid = Nid(0x21);
    pub const NAME_TO_ID_MAP: Nid = Nid(0x61);
    pub const ROOT_FOLDER: Nid = Nid(0x122);

    pub const fn from_raw(raw: u32) -> Self {
        Nid(raw)
    }

    pub fn new(nid_type: NidType, index: u32) -> Self {
        Nid((index << 5) | u32::from(nid_type.code()))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Value the Node Index is keyed on.
    pub fn key(self) -> u64 {
        u64::from(self.0)
    }

    pub fn nid_type(self) -> NidType {
        NidType::from_code((self.0 & 0x1f) as u8)
    }

    pub fn index(self) -> u32 {
        self.0 >> 5
    }

    /// Internal nodes carry no heap, except for the two well-known property bags.
    pub fn has_heap(self) -> bool {
        self.nid_type() != NidType::Internal
            || self == Nid::MESSAGE_STORE
            || self == Nid::NAME_TO_ID_MAP
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        reader.read_u32::<LittleEndian>().map(Nid)
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ── IB / BREF ────────────────────────────────────────────────────────────────

/// Absolute file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Ib(pub u64);

impl Ib {
    pub fn read<R: Read>(mut reader: R, variant: FormatVariant) -> io::Result<Self> {
        read_width(&mut reader, variant).map(Ib)
    }
}

/// A block id paired with the offset it currently lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Bref {
    pub bid: Bid,
    pub ib: Ib,
}

impl Bref {
    pub fn read<R: Read>(mut reader: R, variant: FormatVariant) -> io::Result<Self> {
        let bid = Bid::read(&mut reader, variant)?;
        let ib = Ib::read(&mut reader, variant)?;
        Ok(Self { bid, ib })
    }
}

impl fmt::Display for Bref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.bid, self.ib.0)
    }
}
