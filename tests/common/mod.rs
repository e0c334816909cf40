//! Synthetic PST/OST images for the integration tests.
//!
//! `PstBuilder` lays out blocks, then the Node Index and Block Index pages,
//! then writes a header with valid CRCs.  The heap helpers build property
//! bags, row tables and B-trees-on-heap as single heap blocks.
#![allow(dead_code)]

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use pstkit::block::block_signature;
use pstkit::crc::crc_of;
use pstkit::{Bid, Encryption, FormatVariant, Hid, Nid};

pub const CLIENT_PC: u8 = 0xbc;
pub const CLIENT_TC: u8 = 0x7c;

const DATA_START: usize = 0x4400;
const PTYPE_BBT: u8 = 0x80;
const PTYPE_NBT: u8 = 0x81;

// ── Raw writers ──────────────────────────────────────────────────────────────

fn put_width(out: &mut Vec<u8>, value: u64, variant: FormatVariant) {
    if variant.is_wide() {
        out.extend_from_slice(&value.to_le_bytes());
    } else {
        out.extend_from_slice(&(value as u32).to_le_bytes());
    }
}

fn put_at(out: &mut [u8], at: usize, bytes: &[u8]) {
    out[at..at + bytes.len()].copy_from_slice(bytes);
}

fn align(out: &mut Vec<u8>, to: usize) {
    let len = (out.len() + to - 1) / to * to;
    out.resize(len, 0);
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

// ── Builder ──────────────────────────────────────────────────────────────────

struct StoredBlock {
    bid: Bid,
    stored: Vec<u8>,
    inflated: usize,
}

#[derive(Clone, Copy)]
struct NodeRecord {
    nid: Nid,
    data: Bid,
    subnode: Bid,
    parent: Nid,
}

pub struct PstBuilder {
    variant: FormatVariant,
    encryption: Encryption,
    leaves_per_page: Option<usize>,
    next_id: u64,
    blocks: Vec<StoredBlock>,
    nodes: Vec<NodeRecord>,
}

impl PstBuilder {
    pub fn new(variant: FormatVariant) -> Self {
        Self {
            variant,
            encryption: Encryption::None,
            leaves_per_page: None,
            next_id: 1,
            blocks: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    /// Cap the records per index page to force deeper trees.
    pub fn leaves_per_page(mut self, n: usize) -> Self {
        self.leaves_per_page = Some(n.max(2));
        self
    }

    pub fn variant(&self) -> FormatVariant {
        self.variant
    }

    fn next_bid(&mut self, internal: bool) -> Bid {
        let raw = (self.next_id << 2) | if internal { 2 } else { 0 };
        self.next_id += 1;
        Bid::from_raw(raw)
    }

    fn push(&mut self, bid: Bid, mut stored: Vec<u8>, inflated: usize) {
        if !bid.is_internal() {
            self.encryption.encrypt(&mut stored, bid.crypt_key());
        }
        self.blocks.push(StoredBlock { bid, stored, inflated });
    }

    pub fn add_block(&mut self, payload: &[u8]) -> Bid {
        let bid = self.next_bid(false);
        self.push(bid, payload.to_vec(), payload.len());
        bid
    }

    pub fn add_compressed_block(&mut self, payload: &[u8]) -> Bid {
        let bid = self.next_bid(false);
        self.push(bid, zlib(payload), payload.len());
        bid
    }

    /// XBLOCK (level 1) or XXBLOCK (level 2), or any other level for
    /// negative tests.
    pub fn add_tree_block(&mut self, level: u8, children: &[Bid], total: u32) -> Bid {
        let mut body = vec![0x01, level];
        body.extend_from_slice(&(children.len() as u16).to_le_bytes());
        body.extend_from_slice(&total.to_le_bytes());
        for child in children {
            put_width(&mut body, child.raw(), self.variant);
        }
        let bid = self.next_bid(true);
        self.push(bid, body.clone(), body.len());
        bid
    }

    /// One block per chunk; more than one chunk goes under an XBLOCK.
    pub fn add_data(&mut self, chunks: &[&[u8]]) -> Bid {
        if chunks.len() == 1 {
            return self.add_block(chunks[0]);
        }
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        let kids: Vec<Bid> = chunks.iter().map(|c| self.add_block(c)).collect();
        self.add_tree_block(1, &kids, total as u32)
    }

    /// SLBLOCK holding `(nid, data, subnode)` entries.
    pub fn add_subnodes(&mut self, entries: &[(Nid, Bid, Bid)]) -> Bid {
        let mut body = self.subnode_header(0, entries.len());
        for (nid, data, sub) in entries {
            self.put_subnode_nid(&mut body, *nid);
            put_width(&mut body, data.raw(), self.variant);
            put_width(&mut body, sub.raw(), self.variant);
        }
        let bid = self.next_bid(true);
        self.push(bid, body.clone(), body.len());
        bid
    }

    /// SIBLOCK at `level` pointing at lower subnode blocks.
    pub fn add_subnode_index(&mut self, level: u8, children: &[(Nid, Bid)]) -> Bid {
        let mut body = self.subnode_header(level, children.len());
        for (nid, bid) in children {
            self.put_subnode_nid(&mut body, *nid);
            put_width(&mut body, bid.raw(), self.variant);
        }
        let bid = self.next_bid(true);
        self.push(bid, body.clone(), body.len());
        bid
    }

    fn subnode_header(&self, level: u8, count: usize) -> Vec<u8> {
        let mut body = vec![0x02, level];
        body.extend_from_slice(&(count as u16).to_le_bytes());
        if self.variant.is_wide() {
            body.extend_from_slice(&[0; 4]);
        }
        body
    }

    fn put_subnode_nid(&self, body: &mut Vec<u8>, nid: Nid) {
        body.extend_from_slice(&nid.raw().to_le_bytes());
        if self.variant.is_wide() {
            body.extend_from_slice(&[0; 4]);
        }
    }

    pub fn add_node(&mut self, nid: Nid, data: Bid, subnode: Bid, parent: Nid) {
        self.nodes.push(NodeRecord { nid, data, subnode, parent });
    }

    /// Store `heap` in one block and register it as node `nid`.
    pub fn add_heap_node(&mut self, nid: Nid, heap: &[u8]) -> Bid {
        let bid = self.add_block(heap);
        self.add_node(nid, bid, Bid::NULL, Nid::ROOT_FOLDER);
        bid
    }

    pub fn build(&self) -> Vec<u8> {
        let v = self.variant;
        let mut out = vec![0u8; DATA_START];

        let mut bbt = Vec::new();
        for block in &self.blocks {
            align(&mut out, v.block_alignment());
            let ib = out.len() as u64;
            out.extend_from_slice(&block_image(v, block, ib));
            bbt.push((block.bid.key(), self.bbt_record(block, ib)));
        }

        let nbt: Vec<(u64, Vec<u8>)> =
            self.nodes.iter().map(|n| (u64::from(n.nid.raw()), self.nbt_record(n))).collect();

        let mut page_id = 0x10_0000u64;
        let nbt_root = self.write_tree(&mut out, PTYPE_NBT, nbt_entry_size(v), nbt, &mut page_id);
        let bbt_root = self.write_tree(&mut out, PTYPE_BBT, bbt_entry_size(v), bbt, &mut page_id);

        let eof = out.len() as u64;
        let header = header_image(v, self.encryption, nbt_root, bbt_root, eof, self.next_id << 2);
        put_at(&mut out, 0, &header);
        out
    }

    fn bbt_record(&self, block: &StoredBlock, ib: u64) -> Vec<u8> {
        let v = self.variant;
        let mut rec = Vec::new();
        put_width(&mut rec, block.bid.raw(), v);
        put_width(&mut rec, ib, v);
        rec.extend_from_slice(&(block.stored.len() as u16).to_le_bytes());
        if v == FormatVariant::Unicode4k {
            rec.extend_from_slice(&(block.inflated as u16).to_le_bytes());
        }
        rec.extend_from_slice(&2u16.to_le_bytes());
        rec.resize(bbt_entry_size(v), 0);
        rec
    }

    fn nbt_record(&self, node: &NodeRecord) -> Vec<u8> {
        let v = self.variant;
        let mut rec = Vec::new();
        put_width(&mut rec, u64::from(node.nid.raw()), v);
        put_width(&mut rec, node.data.raw(), v);
        put_width(&mut rec, node.subnode.raw(), v);
        rec.extend_from_slice(&node.parent.raw().to_le_bytes());
        rec.resize(nbt_entry_size(v), 0);
        rec
    }

    /// Write one paged B-tree bottom-up and return its root `(bid, ib)`.
    fn write_tree(
        &self,
        out: &mut Vec<u8>,
        ptype: u8,
        leaf_size: usize,
        mut records: Vec<(u64, Vec<u8>)>,
        page_id: &mut u64,
    ) -> (u64, u64) {
        let v = self.variant;
        records.sort_by_key(|(k, _)| *k);
        let mut level = 0u8;
        let mut entry_size = leaf_size;
        loop {
            let capacity = v.page_entry_area() / entry_size;
            let per_page = self.leaves_per_page.unwrap_or(capacity).min(capacity);
            let pages: Vec<&[(u64, Vec<u8>)]> =
                if records.is_empty() { vec![&[]] } else { records.chunks(per_page).collect() };

            let mut parents = Vec::new();
            for page in pages {
                *page_id += 4;
                let bid = *page_id;
                let ib = write_page(out, v, ptype, level, entry_size, page, bid);
                let first = page.first().map_or(0, |(k, _)| *k);
                let mut rec = Vec::new();
                put_width(&mut rec, first, v);
                put_width(&mut rec, bid, v);
                put_width(&mut rec, ib, v);
                parents.push((first, rec, bid, ib));
            }
            if parents.len() == 1 {
                return (parents[0].2, parents[0].3);
            }
            records = parents.into_iter().map(|(k, rec, _, _)| (k, rec)).collect();
            entry_size = bt_entry_size(v);
            level += 1;
        }
    }
}

fn bbt_entry_size(v: FormatVariant) -> usize {
    if v.is_wide() { 24 } else { 12 }
}

fn nbt_entry_size(v: FormatVariant) -> usize {
    if v.is_wide() { 32 } else { 16 }
}

fn bt_entry_size(v: FormatVariant) -> usize {
    if v.is_wide() { 24 } else { 12 }
}

fn block_image(v: FormatVariant, block: &StoredBlock, ib: u64) -> Vec<u8> {
    let cb = block.stored.len();
    let size = v.block_size(cb);
    let mut image = block.stored.clone();
    image.resize(size - v.block_trailer_size(), 0);
    let crc = crc_of(&block.stored);
    image.extend_from_slice(&(cb as u16).to_le_bytes());
    image.extend_from_slice(&block_signature(ib, block.bid.raw()).to_le_bytes());
    if v.is_wide() {
        image.extend_from_slice(&crc.to_le_bytes());
        image.extend_from_slice(&block.bid.raw().to_le_bytes());
    } else {
        image.extend_from_slice(&(block.bid.raw() as u32).to_le_bytes());
        image.extend_from_slice(&crc.to_le_bytes());
    }
    image.resize(size, 0);
    image
}

fn write_page(
    out: &mut Vec<u8>,
    v: FormatVariant,
    ptype: u8,
    level: u8,
    entry_size: usize,
    records: &[(u64, Vec<u8>)],
    bid: u64,
) -> u64 {
    align(out, v.page_size());
    let ib = out.len() as u64;
    let mut page = vec![0u8; v.page_size()];
    for (i, (_, rec)) in records.iter().enumerate() {
        put_at(&mut page, i * entry_size, rec);
    }
    let max = v.page_entry_area() / entry_size;
    let meta_at = v.page_entry_area();
    if v == FormatVariant::Unicode4k {
        put_at(&mut page, meta_at, &(records.len() as u16).to_le_bytes());
        put_at(&mut page, meta_at + 2, &(max as u16).to_le_bytes());
        page[meta_at + 4] = entry_size as u8;
        page[meta_at + 5] = level;
    } else {
        page[meta_at] = records.len() as u8;
        page[meta_at + 1] = max as u8;
        page[meta_at + 2] = entry_size as u8;
        page[meta_at + 3] = level;
    }

    let trailer_at = v.page_size() - v.page_trailer_size();
    let crc = crc_of(&page[..trailer_at]);
    let mut trailer = vec![ptype, ptype];
    trailer.extend_from_slice(&block_signature(ib, bid).to_le_bytes());
    if v.is_wide() {
        trailer.extend_from_slice(&crc.to_le_bytes());
        trailer.extend_from_slice(&bid.to_le_bytes());
    } else {
        trailer.extend_from_slice(&(bid as u32).to_le_bytes());
        trailer.extend_from_slice(&crc.to_le_bytes());
    }
    put_at(&mut page, trailer_at, &trailer);
    out.extend_from_slice(&page);
    ib
}

/// Header with both CRCs filled in.
pub fn header_image(
    v: FormatVariant,
    encryption: Encryption,
    nbt_root: (u64, u64),
    bbt_root: (u64, u64),
    eof: u64,
    next_bid: u64,
) -> Vec<u8> {
    let size = if v.is_wide() { 564 } else { 512 };
    let mut h = vec![0u8; size];
    put_at(&mut h, 0, b"!BDN");
    put_at(&mut h, 8, &0x4d53u16.to_le_bytes());
    put_at(&mut h, 10, &v.version().to_le_bytes());
    put_at(&mut h, 12, &19u16.to_le_bytes());
    h[14] = 0x01;
    h[15] = 0x01;

    let mut put = |at: usize, value: u64| {
        let mut buf = Vec::new();
        put_width(&mut buf, value, v);
        put_at(&mut h, at, &buf);
    };
    if v.is_wide() {
        put(32, next_bid);
        put(184, eof);
        put(216, nbt_root.0);
        put(224, nbt_root.1);
        put(232, bbt_root.0);
        put(240, bbt_root.1);
        put(516, next_bid);
    } else {
        put(24, next_bid);
        put(28, next_bid);
        put(168, eof);
        put(184, nbt_root.0);
        put(188, nbt_root.1);
        put(192, bbt_root.0);
        put(196, bbt_root.1);
    }
    let (sentinel_at, crypt_at) = if v.is_wide() { (512, 513) } else { (460, 461) };
    h[sentinel_at] = 0x80;
    h[crypt_at] = encryption.method();

    let partial = crc_of(&h[8..8 + 471]);
    put_at(&mut h, 4, &partial.to_le_bytes());
    if v.is_wide() {
        let full = crc_of(&h[8..8 + 516]);
        put_at(&mut h, 524, &full.to_le_bytes());
    }
    h
}

// ── Heaps ────────────────────────────────────────────────────────────────────

/// First heap block: HNHDR, the slots, then the page map.
pub fn heap(client: u8, root: Hid, slots: &[Vec<u8>]) -> Vec<u8> {
    let mut header = vec![0u8; 12];
    header[2] = 0xec;
    header[3] = client;
    put_at(&mut header, 4, &root.raw().to_le_bytes());
    heap_block(header, slots)
}

/// A later heap block with only HNPAGEHDR.
pub fn heap_page(slots: &[Vec<u8>]) -> Vec<u8> {
    heap_block(vec![0u8; 2], slots)
}

fn heap_block(mut block: Vec<u8>, slots: &[Vec<u8>]) -> Vec<u8> {
    let mut offsets = vec![block.len() as u16];
    for slot in slots {
        block.extend_from_slice(slot);
        offsets.push(block.len() as u16);
    }
    if block.len() % 2 == 1 {
        block.push(0);
    }
    let ib_hnpm = block.len() as u16;
    put_at(&mut block, 0, &ib_hnpm.to_le_bytes());
    block.extend_from_slice(&(slots.len() as u16).to_le_bytes());
    block.extend_from_slice(&0u16.to_le_bytes());
    for o in offsets {
        block.extend_from_slice(&o.to_le_bytes());
    }
    block
}

pub fn bth_header(key_size: u8, data_size: u8, levels: u8, root: Hid) -> Vec<u8> {
    let mut h = vec![0xb5, key_size, data_size, levels];
    h.extend_from_slice(&root.raw().to_le_bytes());
    h
}

/// How a property bag leaf stores its value.
pub enum Stored {
    Inline(u32),
    Heap(Vec<u8>),
    Subnode(Nid),
}

/// Property bag heap: slot 1 is the BTH header, slot 2 the leaves, then one
/// slot per heap-stored value.
pub fn property_context(props: &[(u16, u16, Stored)]) -> Vec<u8> {
    let mut slots = vec![bth_header(2, 6, 0, Hid::new(0, 2)), Vec::new()];
    let mut leaves: Vec<(u16, Vec<u8>)> = Vec::new();
    for (id, ptype, stored) in props {
        let hnid = match stored {
            Stored::Inline(v) => *v,
            Stored::Heap(bytes) => {
                slots.push(bytes.clone());
                Hid::new(0, slots.len() as u16).raw()
            }
            Stored::Subnode(nid) => nid.raw(),
        };
        let mut rec = id.to_le_bytes().to_vec();
        rec.extend_from_slice(&ptype.to_le_bytes());
        rec.extend_from_slice(&hnid.to_le_bytes());
        leaves.push((*id, rec));
    }
    leaves.sort_by_key(|(id, _)| *id);
    slots[1] = leaves.into_iter().flat_map(|(_, rec)| rec).collect();
    heap(CLIENT_PC, Hid::new(0, 1), &slots)
}

#[derive(Clone, Copy)]
pub struct Column {
    pub tag: u32,
    pub offset: u16,
    pub width: u8,
    pub bit: u8,
}

pub enum Rows {
    Heap(Vec<u8>),
    Subnode(Nid),
    Absent,
}

/// Row table heap: slot 1 TCINFO, slot 2 the row-index BTH header, slot 3 its
/// leaves, slot 4 heap rows (possibly empty), then `extra` from slot 5.
pub fn table_context(columns: &[Column], rgib: [u16; 4], row_ids: &[u32], rows: Rows, extra: &[Vec<u8>]) -> Vec<u8> {
    let hnid_rows = match &rows {
        Rows::Heap(_) => Hid::new(0, 4).raw(),
        Rows::Subnode(nid) => nid.raw(),
        Rows::Absent => 0,
    };
    let mut info = vec![CLIENT_TC, columns.len() as u8];
    for r in rgib {
        info.extend_from_slice(&r.to_le_bytes());
    }
    info.extend_from_slice(&Hid::new(0, 2).raw().to_le_bytes());
    info.extend_from_slice(&hnid_rows.to_le_bytes());
    info.extend_from_slice(&0u32.to_le_bytes());
    for c in columns {
        info.extend_from_slice(&c.tag.to_le_bytes());
        info.extend_from_slice(&c.offset.to_le_bytes());
        info.push(c.width);
        info.push(c.bit);
    }

    let mut index = Vec::new();
    for (i, id) in row_ids.iter().enumerate() {
        index.extend_from_slice(&id.to_le_bytes());
        index.extend_from_slice(&(i as u32).to_le_bytes());
    }
    let heap_rows = match rows {
        Rows::Heap(bytes) => bytes,
        _ => Vec::new(),
    };

    let mut slots = vec![info, bth_header(4, 4, 0, Hid::new(0, 3)), index, heap_rows];
    slots.extend(extra.iter().cloned());
    heap(CLIENT_TC, Hid::new(0, 1), &slots)
}

/// Heap id of `table_context`'s `extra[i]`.
pub fn extra_slot(i: usize) -> Hid {
    Hid::new(0, 5 + i as u16)
}

// ── Values ───────────────────────────────────────────────────────────────────

pub fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// The three binary streams of the name-to-id map node.
pub fn name_map(guids: &[u8], entries: &[u8], strings: &[u8]) -> Vec<u8> {
    property_context(&[
        (0x0002, 0x0102, Stored::Heap(guids.to_vec())),
        (0x0003, 0x0102, Stored::Heap(entries.to_vec())),
        (0x0004, 0x0102, Stored::Heap(strings.to_vec())),
    ])
}

pub fn name_entry(value: u32, guid_index: u16, is_string: bool, prop_index: u16) -> Vec<u8> {
    let mut e = value.to_le_bytes().to_vec();
    e.extend_from_slice(&((guid_index << 1) | u16::from(is_string)).to_le_bytes());
    e.extend_from_slice(&prop_index.to_le_bytes());
    e
}
