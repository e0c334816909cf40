//! B-Tree-on-Heap.
//!
//! A small B-tree whose nodes are heap slots.  The header slot holds
//! `{bType = 0xB5, cbKey, cbEnt, bIdxLevels, hidRoot}`; leaf slots hold packed
//! `{key, data}` records and intermediate slots packed `{key, hid}` records.
//! Keys are unsigned little-endian integers of 1, 2, 4 or 8 bytes.

use serde::Serialize;
use tracing::debug;

use crate::error::{PstError, Result};
use crate::fields::{field, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::heap::{HeapOnNode, Hid};

pub const BTH_TYPE: u8 = 0xB5;

const BTHHEADER: &[Field] = &[
    field("bType", K::U8),
    field("cbKey", K::U8),
    field("cbEnt", K::U8),
    field("bIdxLevels", K::U8),
    field("hidRoot", K::U32),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BthHeader {
    pub key_size: usize,
    pub data_size: usize,
    pub levels: u8,
    pub root: Hid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BthRecord {
    pub key: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Vec<BthRecord>),
    Branch(Vec<(u64, Node)>),
}

impl Node {
    fn leaves(&self) -> Box<dyn Iterator<Item = &BthRecord> + '_> {
        match self {
            Node::Leaf(records) => Box::new(records.iter()),
            Node::Branch(children) => Box::new(children.iter().flat_map(|(_, n)| n.leaves())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BTreeOnHeap {
    header: BthHeader,
    root: Option<Node>,
}

/// Decode a little-endian unsigned key of 1 to 8 bytes.
pub fn key_value(bytes: &[u8]) -> u64 {
    bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

impl BTreeOnHeap {
    /// Read the tree whose header lives in slot `hid`.
    pub fn read(heap: &HeapOnNode, hid: Hid) -> Result<Self> {
        let slot = heap
            .heap_data(hid)
            .ok_or_else(|| PstError::corrupt(format!("b-tree-on-heap header {hid} not in heap")))?;
        let bag = FieldBag::read(slot, BTHHEADER, FormatVariant::Unicode)?;
        let btype = bag.u8("bType")?;
        if btype != BTH_TYPE {
            return Err(PstError::corrupt(format!("b-tree-on-heap header has type {btype:#04x}")));
        }
        let header = BthHeader {
            key_size: usize::from(bag.u8("cbKey")?),
            data_size: usize::from(bag.u8("cbEnt")?),
            levels: bag.u8("bIdxLevels")?,
            root: Hid::from_raw(bag.u32("hidRoot")?),
        };
        if !matches!(header.key_size, 1 | 2 | 4 | 8) {
            return Err(PstError::corrupt(format!("b-tree-on-heap key size {}", header.key_size)));
        }

        let root = if heap.is_valid(header.root) {
            Some(load(heap, &header, header.root, header.levels)?)
        } else {
            None
        };
        let tree = Self { header, root };
        debug!(key_size = header.key_size, data_size = header.data_size, levels = header.levels,
               leaves = tree.leaf_count(), "read b-tree-on-heap");
        Ok(tree)
    }

    pub fn header(&self) -> &BthHeader {
        &self.header
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    pub fn leaves(&self) -> Box<dyn Iterator<Item = &BthRecord> + '_> {
        match &self.root {
            Some(node) => node.leaves(),
            None => Box::new(std::iter::empty()),
        }
    }

    /// Data stored under `key`, which must be exactly `key_size` bytes.
    pub fn find(&self, key: &[u8]) -> Option<&[u8]> {
        if key.len() != self.header.key_size {
            return None;
        }
        self.find_key(key_value(key))
    }

    pub fn find_key(&self, key: u64) -> Option<&[u8]> {
        let mut node = self.root.as_ref()?;
        loop {
            match node {
                Node::Leaf(records) => {
                    return records.iter().find(|r| r.key == key).map(|r| r.data.as_slice())
                }
                Node::Branch(children) => {
                    node = &children.iter().take_while(|(k, _)| *k <= key).last()?.1;
                }
            }
        }
    }
}

fn load(heap: &HeapOnNode, header: &BthHeader, hid: Hid, level: u8) -> Result<Node> {
    let slot = heap
        .heap_data(hid)
        .ok_or_else(|| PstError::corrupt(format!("b-tree-on-heap node {hid} not in heap")))?;
    let k = header.key_size;
    if level == 0 {
        let size = k + header.data_size;
        let records = slot
            .chunks_exact(size)
            .map(|r| BthRecord { key: key_value(&r[..k]), data: r[k..].to_vec() })
            .collect();
        return Ok(Node::Leaf(records));
    }
    let children = slot
        .chunks_exact(k + 4)
        .map(|r| {
            let child = Hid::from_raw(key_value(&r[k..]) as u32);
            Ok((key_value(&r[..k]), load(heap, header, child, level - 1)?))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Node::Branch(children))
}
