//! Property layer: tags, the on-disk type registry, decoded values, and the
//! two record decoders built on the heap (property bags and row tables).

mod bag;
mod table;
mod value;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::bth::key_value;
use crate::error::{PstError, Result};
use crate::heap::{HeapOnNode, Hid};
use crate::ids::{Bid, Nid};
use crate::ndb::NodeDatabase;
use crate::subnode::SubnodeTree;

pub use bag::PropertyBag;
pub use table::{ColumnDescriptor, Row, RowTable};
pub use value::{decode_value, PropertyValue, Resolver, ServerId};

/// `PidTagContainerClassW`, which Outlook sometimes fills with 8-bit text.
pub const TAG_CONTAINER_CLASS_W: PropertyTag = PropertyTag::from_raw(0x3613_001f);
pub const TAG_DISPLAY_NAME_W: PropertyTag = PropertyTag::from_raw(0x3001_001f);
pub const TAG_MESSAGE_CLASS_W: PropertyTag = PropertyTag::from_raw(0x001a_001f);
pub const TAG_SUBJECT_W: PropertyTag = PropertyTag::from_raw(0x0037_001f);

/// Property types whose values carry a count of elements.
const MULTIPLE: u16 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PropertyType {
    Unspecified,
    Null,
    I16,
    I32,
    F32,
    F64,
    Currency,
    FloatingTime,
    Error,
    Boolean,
    Object,
    I64,
    String8,
    String,
    Time,
    Guid,
    ServerId,
    Restriction,
    RuleAction,
    Binary,
    MultipleI16,
    MultipleI32,
    MultipleF32,
    MultipleF64,
    MultipleCurrency,
    MultipleFloatingTime,
    MultipleI64,
    MultipleString8,
    MultipleString,
    MultipleTime,
    MultipleGuid,
    MultipleBinary,
    Unknown(u16),
}

impl PropertyType {
    pub fn from_code(code: u16) -> Self {
        use PropertyType::*;
        match code {
            0x0000 => Unspecified,
            0x0001 => Null,
            0x0002 => I16,
            0x0003 => I32,
            0x0004 => F32,
            0x0005 => F64,
            0x0006 => Currency,
            0x0007 => FloatingTime,
            0x000a => Error,
            0x000b => Boolean,
            0x000d => Object,
            0x0014 => I64,
            0x001e => String8,
            0x001f => String,
            0x0040 => Time,
            0x0048 => Guid,
            0x00fb => ServerId,
            0x00fd => Restriction,
            0x00fe => RuleAction,
            0x0102 => Binary,
            0x1002 => MultipleI16,
            0x1003 => MultipleI32,
            0x1004 => MultipleF32,
            0x1005 => MultipleF64,
            0x1006 => MultipleCurrency,
            0x1007 => MultipleFloatingTime,
            0x1014 => MultipleI64,
            0x101e => MultipleString8,
            0x101f => MultipleString,
            0x1040 => MultipleTime,
            0x1048 => MultipleGuid,
            0x1102 => MultipleBinary,
            other => Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        use PropertyType::*;
        match self {
            Unspecified => 0x0000,
            Null => 0x0001,
            I16 => 0x0002,
            I32 => 0x0003,
            F32 => 0x0004,
            F64 => 0x0005,
            Currency => 0x0006,
            FloatingTime => 0x0007,
            Error => 0x000a,
            Boolean => 0x000b,
            Object => 0x000d,
            I64 => 0x0014,
            String8 => 0x001e,
            String => 0x001f,
            Time => 0x0040,
            Guid => 0x0048,
            ServerId => 0x00fb,
            Restriction => 0x00fd,
            RuleAction => 0x00fe,
            Binary => 0x0102,
            MultipleI16 => 0x1002,
            MultipleI32 => 0x1003,
            MultipleF32 => 0x1004,
            MultipleF64 => 0x1005,
            MultipleCurrency => 0x1006,
            MultipleFloatingTime => 0x1007,
            MultipleI64 => 0x1014,
            MultipleString8 => 0x101e,
            MultipleString => 0x101f,
            MultipleTime => 0x1040,
            MultipleGuid => 0x1048,
            MultipleBinary => 0x1102,
            Unknown(code) => code,
        }
    }

    /// Fixed size of one value in bytes; 0 for variable-length types.
    pub fn size(self) -> usize {
        use PropertyType::*;
        match self {
            Boolean => 1,
            I16 => 2,
            I32 | F32 | Error => 4,
            F64 | Currency | FloatingTime | I64 | Time => 8,
            Guid => 16,
            _ => 0,
        }
    }

    pub fn is_multiple(self) -> bool {
        !matches!(self, PropertyType::Unknown(_)) && self.code() & MULTIPLE != 0
    }

    /// Whether a property bag keeps the value in its 4-byte leaf slot.
    pub fn is_inline_in_bag(self) -> bool {
        matches!(self.size(), 1..=4)
    }

    /// Whether a row-table cell of at most 4 bytes holds an HNID for this type.
    pub fn is_hnid_in_table(self) -> bool {
        use PropertyType::*;
        matches!(self, Object | String | String8 | Binary | Guid) || self.is_multiple()
    }
}

/// `(property id << 16) | property type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PropertyTag(u32);

impl PropertyTag {
    pub const fn from_raw(raw: u32) -> Self {
        PropertyTag(raw)
    }

    pub fn new(id: u16, ptype: PropertyType) -> Self {
        PropertyTag((u32::from(id) << 16) | u32::from(ptype.code()))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn ptype(self) -> PropertyType {
        PropertyType::from_code(self.0 as u16)
    }

    /// Named properties occupy ids 0x8000 and up.
    pub fn is_named(self) -> bool {
        self.id() >= 0x8000
    }
}

impl fmt::Display for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// The type actually stored in a heap slot, which differs from the declared
/// one for 8-bit text written into `PidTagContainerClassW`.
pub(crate) fn stored_type(tag: PropertyTag, data: &[u8]) -> PropertyType {
    if tag == TAG_CONTAINER_CLASS_W && data.get(1).is_some_and(|b| *b != 0) {
        return PropertyType::String8;
    }
    tag.ptype()
}

/// Turns the HNIDs found in bag leaves and table cells into values.
pub(crate) struct HnidResolver<'a> {
    ndb: &'a Arc<NodeDatabase>,
    heap: &'a HeapOnNode,
    subnode_bid: Bid,
    subnodes: Option<SubnodeTree>,
}

impl<'a> HnidResolver<'a> {
    pub(crate) fn new(ndb: &'a Arc<NodeDatabase>, heap: &'a HeapOnNode, subnode_bid: Bid) -> Self {
        Self { ndb, heap, subnode_bid, subnodes: None }
    }

    pub(crate) fn subnodes(&mut self) -> Result<&SubnodeTree> {
        let tree = match self.subnodes.take() {
            Some(tree) => tree,
            None => SubnodeTree::read(self.ndb, self.subnode_bid)?,
        };
        Ok(self.subnodes.insert(tree))
    }

    /// `None` when the HNID is a heap id that names no slot.
    pub(crate) fn resolve(&mut self, tag: PropertyTag, hnid: &[u8]) -> Result<Option<PropertyValue>> {
        let raw = key_value(hnid) as u32;
        let hid = Hid::from_raw(raw);
        if hid.hid_type() != 0 {
            let nid = Nid::from_raw(raw);
            let ndb = Arc::clone(self.ndb);
            let entry = *self.subnodes()?.find(nid).ok_or(PstError::NodeNotFound(nid))?;
            return Ok(Some(PropertyValue::Deferred(Resolver::new(ndb, tag, entry))));
        }
        match self.heap.heap_data(hid) {
            Some(data) => decode_value(stored_type(tag, data), data).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for code in [0x0002, 0x0003, 0x000b, 0x001e, 0x001f, 0x0040, 0x0048, 0x00fb, 0x0102, 0x1003, 0x1102] {
            assert_eq!(PropertyType::from_code(code).code(), code);
        }
        assert_eq!(PropertyType::from_code(0x0077), PropertyType::Unknown(0x0077));
        assert_eq!(PropertyType::Unknown(0x0077).code(), 0x0077);
    }

    #[test]
    fn storage_rules() {
        assert!(PropertyType::I32.is_inline_in_bag());
        assert!(PropertyType::Boolean.is_inline_in_bag());
        assert!(!PropertyType::I64.is_inline_in_bag());
        assert!(!PropertyType::Time.is_inline_in_bag());
        assert!(!PropertyType::String.is_inline_in_bag());

        assert!(PropertyType::MultipleI32.is_multiple());
        assert!(!PropertyType::Unknown(0x1077).is_multiple());
        assert!(PropertyType::Binary.is_hnid_in_table());
        assert!(PropertyType::MultipleString.is_hnid_in_table());
        assert!(!PropertyType::I64.is_hnid_in_table());
    }

    #[test]
    fn tag_parts() {
        let tag = PropertyTag::new(0x3001, PropertyType::String);
        assert_eq!(tag, TAG_DISPLAY_NAME_W);
        assert_eq!(tag.id(), 0x3001);
        assert_eq!(tag.ptype(), PropertyType::String);
        assert!(!tag.is_named());
        assert!(PropertyTag::from_raw(0x8005_0003).is_named());
        assert_eq!(tag.to_string(), "0x3001001f");
    }

    #[test]
    fn container_class_quirk() {
        assert_eq!(stored_type(TAG_CONTAINER_CLASS_W, b"IPF.Note"), PropertyType::String8);
        assert_eq!(stored_type(TAG_CONTAINER_CLASS_W, b"I\0P\0"), PropertyType::String);
        assert_eq!(stored_type(TAG_DISPLAY_NAME_W, b"IPF.Note"), PropertyType::String);
    }
}
