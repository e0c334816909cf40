//! Node database: the block store plus both paged indexes.
//!
//! This is the layer everything above addresses data through.  A node's data
//! BID resolves either to one simple block or, when the BID is internal, to a
//! data tree whose leaves are returned in order:
//!
//! ```text
//! XXBLOCK (level 2) ──► XBLOCK (level 1) ──► leaf, leaf, ...
//!                   └─► XBLOCK (level 1) ──► leaf, ...
//! ```
//!
//! Any level other than 1 or 2, or a child of the wrong kind, is corruption.

use std::sync::Arc;
use tracing::warn;

use crate::block::{parse_data_tree, BlockStore};
use crate::btree::{open_index, BbtEntry, NbtEntry, PagedIndex};
use crate::error::{PstError, Result};
use crate::format::FormatVariant;
use crate::header::Header;
use crate::ids::{Bid, Nid};
use crate::options::DecodeOptions;
use crate::source::ReadAt;

pub struct NodeDatabase {
    store: Arc<BlockStore>,
    blocks: Box<dyn PagedIndex<BbtEntry>>,
    nodes: Box<dyn PagedIndex<NbtEntry>>,
}

impl NodeDatabase {
    pub fn open(source: Box<dyn ReadAt>, header: &Header, options: DecodeOptions) -> Result<Self> {
        let store = Arc::new(BlockStore::new(source, header.variant, header.encryption, options));
        let blocks = open_index::<BbtEntry>(&store, header.bbt_root, options.index_mode)?;
        let nodes = open_index::<NbtEntry>(&store, header.nbt_root, options.index_mode)?;
        Ok(Self { store, blocks, nodes })
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn variant(&self) -> FormatVariant {
        self.store.variant()
    }

    pub fn options(&self) -> &DecodeOptions {
        self.store.options()
    }

    pub fn block_index(&self) -> &dyn PagedIndex<BbtEntry> {
        self.blocks.as_ref()
    }

    pub fn node_index(&self) -> &dyn PagedIndex<NbtEntry> {
        self.nodes.as_ref()
    }

    pub fn find_block(&self, bid: Bid) -> Result<Option<BbtEntry>> {
        self.blocks.find(bid.key())
    }

    pub fn block(&self, bid: Bid) -> Result<BbtEntry> {
        self.find_block(bid)?.ok_or(PstError::BlockNotFound(bid))
    }

    pub fn find_node(&self, nid: Nid) -> Result<Option<NbtEntry>> {
        self.nodes.find(nid.key())
    }

    pub fn node(&self, nid: Nid) -> Result<NbtEntry> {
        self.find_node(nid)?.ok_or(PstError::NodeNotFound(nid))
    }

    /// Payload of one block, without interpreting data trees.
    pub fn read_block(&self, bid: Bid) -> Result<Vec<u8>> {
        let entry = self.block(bid)?;
        self.store.read_block(&entry)
    }

    /// Leaf payloads of the data stored under `bid`, in order.
    pub fn read_blocks(&self, bid: Bid) -> Result<Vec<Vec<u8>>> {
        let entry = self.block(bid)?;
        let data = self.store.read_block(&entry)?;
        if !entry.bid().is_internal() {
            return Ok(vec![data]);
        }
        let mut leaves = Vec::new();
        self.collect_tree(entry.bid(), &data, None, &mut leaves)?;
        Ok(leaves)
    }

    /// All data stored under `bid`, concatenated.
    pub fn read_data(&self, bid: Bid) -> Result<Vec<u8>> {
        Ok(self.read_blocks(bid)?.concat())
    }

    fn collect_tree(
        &self,
        bid: Bid,
        data: &[u8],
        expected_level: Option<u8>,
        leaves: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        let (header, children) = parse_data_tree(bid, data, self.variant())?;
        if let Some(level) = expected_level {
            if header.level != level {
                return Err(PstError::BadXBlockLevel { bid, level: header.level });
            }
        }

        let first = leaves.len();
        for child in children {
            let entry = self.block(child)?;
            let bytes = self.store.read_block(&entry)?;
            match (header.level, entry.bid().is_internal()) {
                (1, false) => leaves.push(bytes),
                (2, true) => self.collect_tree(entry.bid(), &bytes, Some(1), leaves)?,
                (level, _) => {
                    return Err(PstError::corrupt(format!(
                        "data tree {bid} at level {level} references block {child} of the wrong kind"
                    )))
                }
            }
        }

        let assembled: usize = leaves[first..].iter().map(Vec::len).sum();
        if assembled != header.total as usize {
            warn!(%bid, declared = header.total, assembled, "data tree size disagrees with its header");
        }
        Ok(())
    }
}
