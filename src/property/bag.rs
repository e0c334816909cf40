use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::btree::NbtEntry;
use crate::bth::BTreeOnHeap;
use crate::error::{PstError, Result};
use crate::heap::{ClientSignature, HeapOnNode};
use crate::ids::{Bid, Nid};
use crate::ndb::NodeDatabase;
use crate::subnode::SubnodeEntry;

use super::{decode_value, HnidResolver, PropertyTag, PropertyType, PropertyValue};

/// Key and data widths of a property bag's B-tree-on-heap: the property id,
/// then `{wPropType, dwValueHnid}`.
const BAG_KEY_SIZE: usize = 2;
const BAG_DATA_SIZE: usize = 6;

/// A node's properties, keyed by tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyBag {
    nid: Nid,
    properties: BTreeMap<PropertyTag, PropertyValue>,
}

impl PropertyBag {
    /// Decode the property bag stored in node `nid`.
    pub fn read(ndb: &Arc<NodeDatabase>, nid: Nid) -> Result<Self> {
        let node = ndb.node(nid)?;
        Self::from_node(ndb, &node)
    }

    pub fn from_node(ndb: &Arc<NodeDatabase>, node: &NbtEntry) -> Result<Self> {
        Self::decode(ndb, node.nid, node.data, node.subnode)
    }

    /// Decode a bag kept as a subnode, such as an attachment's properties.
    pub fn from_subnode(ndb: &Arc<NodeDatabase>, entry: &SubnodeEntry) -> Result<Self> {
        Self::decode(ndb, entry.nid, entry.data, entry.subnode)
    }

    fn decode(ndb: &Arc<NodeDatabase>, nid: Nid, data: Bid, subnode: Bid) -> Result<Self> {
        if data.is_null() {
            return Err(PstError::NullDataBlock(nid));
        }
        let heap = HeapOnNode::read(ndb, data)?;
        heap.expect_client(ClientSignature::PropertyContext)?;

        let bth = BTreeOnHeap::read(&heap, heap.user_root())?;
        let header = bth.header();
        if header.key_size != BAG_KEY_SIZE || header.data_size != BAG_DATA_SIZE {
            return Err(PstError::corrupt(format!(
                "property bag {nid} has {}-byte keys and {}-byte records",
                header.key_size, header.data_size
            )));
        }

        let mut hnids = HnidResolver::new(ndb, &heap, subnode);
        let mut properties = BTreeMap::new();
        for leaf in bth.leaves() {
            let code = u16::from_le_bytes([leaf.data[0], leaf.data[1]]);
            let ptype = PropertyType::from_code(code);
            let tag = PropertyTag::new(leaf.key as u16, ptype);
            let slot = &leaf.data[2..];

            let value = match ptype {
                PropertyType::Unknown(code) => Some(PropertyValue::Unknown { ptype: code, raw: slot.to_vec() }),
                t if t.is_inline_in_bag() => Some(decode_value(t, slot)?),
                _ => hnids.resolve(tag, slot)?,
            };
            if let Some(value) = value {
                properties.insert(tag, value);
            }
        }
        debug!(%nid, properties = properties.len(), "decoded property bag");
        Ok(Self { nid, properties })
    }

    pub fn nid(&self) -> Nid {
        self.nid
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn get(&self, tag: PropertyTag) -> Option<&PropertyValue> {
        self.properties.get(&tag)
    }

    /// First property with id `id`, whatever its type.
    pub fn get_by_id(&self, id: u16) -> Option<(PropertyTag, &PropertyValue)> {
        self.properties.iter().find(|(t, _)| t.id() == id).map(|(t, v)| (*t, v))
    }

    pub fn contains(&self, tag: PropertyTag) -> bool {
        self.properties.contains_key(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropertyTag, &PropertyValue)> {
        self.properties.iter()
    }
}
