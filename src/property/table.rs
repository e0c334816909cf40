//! Row tables (table contexts).
//!
//! The heap's user root holds TCINFO, then one TCOLDESC per column.  Rows are
//! fixed-width records: 8- and 4-byte cells first, then 2-byte and 1-byte
//! cells, then the cell existence bitmap.  `rgib` gives where each of those
//! regions ends; the last entry is the row width.  Row data lives either in a
//! single heap slot or, for large tables, in a subnode whose blocks each hold
//! a whole number of rows.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::btree::NbtEntry;
use crate::bth::BTreeOnHeap;
use crate::error::{PstError, Result};
use crate::fields::{field, record_size, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::heap::{ClientSignature, HeapOnNode, Hid};
use crate::ids::{Bid, Nid};
use crate::ndb::NodeDatabase;
use crate::subnode::SubnodeEntry;

use super::{decode_value, HnidResolver, PropertyTag, PropertyValue};

const TCINFO: &[Field] = &[
    field("bType", K::U8),
    field("cCols", K::U8),
    field("rgibTCI_4b", K::U16),
    field("rgibTCI_2b", K::U16),
    field("rgibTCI_1b", K::U16),
    field("rgibTCI_bm", K::U16),
    field("hidRowIndex", K::U32),
    field("hnidRows", K::U32),
    field("hidIndex", K::U32),
];

const TCOLDESC: &[Field] = &[
    field("tag", K::U32),
    field("ibData", K::U16),
    field("cbData", K::U8),
    field("iBit", K::U8),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub tag: PropertyTag,
    /// Offset of the cell within the row.
    pub offset: u16,
    pub width: u8,
    /// Index of the column's bit in the cell existence bitmap.
    pub cell_bit: u8,
}

impl ColumnDescriptor {
    fn stores_hnid(&self) -> bool {
        self.width <= 4 && self.tag.ptype().is_hnid_in_table()
    }
}

/// One row; `cells[i]` belongs to `RowTable::columns()[i]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    cells: Vec<Option<PropertyValue>>,
}

impl Row {
    pub fn cells(&self) -> &[Option<PropertyValue>] {
        &self.cells
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowTable {
    nid: Nid,
    columns: Vec<ColumnDescriptor>,
    row_ids: Vec<u32>,
    rows: Vec<Row>,
}

struct Layout {
    bitmap_offset: usize,
    row_width: usize,
}

/// Whether bit `bit` of a cell existence bitmap is set.  Bits run from the
/// most significant bit of each byte.
pub(crate) fn cell_exists(bitmap: &[u8], bit: u8) -> bool {
    let bit = usize::from(bit);
    bitmap.get(bit / 8).is_some_and(|b| b & (1 << (7 - bit % 8)) != 0)
}

impl RowTable {
    /// Decode the row table stored in node `nid`.
    pub fn read(ndb: &Arc<NodeDatabase>, nid: Nid) -> Result<Self> {
        let node = ndb.node(nid)?;
        Self::from_node(ndb, &node)
    }

    pub fn from_node(ndb: &Arc<NodeDatabase>, node: &NbtEntry) -> Result<Self> {
        Self::decode(ndb, node.nid, node.data, node.subnode)
    }

    /// Decode a table kept as a subnode, such as a message's recipients.
    pub fn from_subnode(ndb: &Arc<NodeDatabase>, entry: &SubnodeEntry) -> Result<Self> {
        Self::decode(ndb, entry.nid, entry.data, entry.subnode)
    }

    fn decode(ndb: &Arc<NodeDatabase>, nid: Nid, data: Bid, subnode: Bid) -> Result<Self> {
        if data.is_null() {
            return Err(PstError::NullDataBlock(nid));
        }
        let heap = HeapOnNode::read(ndb, data)?;
        heap.expect_client(ClientSignature::TableContext)?;

        let info_bytes = heap
            .heap_data(heap.user_root())
            .ok_or_else(|| PstError::corrupt(format!("row table {nid} has no TCINFO")))?;
        let info = FieldBag::read(info_bytes, TCINFO, FormatVariant::Unicode)?;
        let btype = info.u8("bType")?;
        if btype != ClientSignature::TableContext.code() {
            return Err(PstError::UnexpectedClientSignature {
                expected: ClientSignature::TableContext,
                found: ClientSignature::from_byte(btype),
            });
        }

        let columns = read_columns(info_bytes, usize::from(info.u8("cCols")?))?;
        let layout = Layout {
            bitmap_offset: usize::from(info.u16("rgibTCI_1b")?),
            row_width: usize::from(info.u16("rgibTCI_bm")?),
        };

        let index = BTreeOnHeap::read(&heap, Hid::from_raw(info.u32("hidRowIndex")?))?;
        let row_ids: Vec<u32> = index.leaves().map(|r| r.key as u32).collect();
        let row_count = row_ids.len();

        let mut hnids = HnidResolver::new(ndb, &heap, subnode);
        let raw_rows = if row_count == 0 || columns.is_empty() || layout.row_width == 0 {
            Vec::new()
        } else {
            read_row_stream(ndb, &heap, &mut hnids, info.u32("hnidRows")?, row_count, layout.row_width)?
        };

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in &raw_rows {
            rows.push(decode_row(raw, &columns, &layout, &mut hnids)?);
        }
        debug!(%nid, columns = columns.len(), rows = rows.len(), "decoded row table");
        Ok(Self { nid, columns, row_ids, rows })
    }

    pub fn nid(&self) -> Nid {
        self.nid
    }

    /// Columns, sorted by their offset within the row.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, tag: PropertyTag) -> Option<usize> {
        self.columns.iter().position(|c| c.tag == tag)
    }

    /// Row-index keys (`dwRowID`), in index order.
    pub fn row_ids(&self) -> &[u32] {
        &self.row_ids
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, row: usize, tag: PropertyTag) -> Option<&PropertyValue> {
        let column = self.column(tag)?;
        self.rows.get(row)?.cells.get(column)?.as_ref()
    }
}

fn read_columns(info_bytes: &[u8], count: usize) -> Result<Vec<ColumnDescriptor>> {
    let start = record_size(TCINFO, FormatVariant::Unicode);
    let size = record_size(TCOLDESC, FormatVariant::Unicode);
    let body = info_bytes
        .get(start..start + count * size)
        .ok_or_else(|| PstError::corrupt(format!("TCINFO too short for {count} columns")))?;

    let mut columns = body
        .chunks_exact(size)
        .map(|rec| {
            let bag = FieldBag::read(rec, TCOLDESC, FormatVariant::Unicode)?;
            Ok(ColumnDescriptor {
                tag: PropertyTag::from_raw(bag.u32("tag")?),
                offset: bag.u16("ibData")?,
                width: bag.u8("cbData")?,
                cell_bit: bag.u8("iBit")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    columns.sort_by_key(|c| c.offset);
    Ok(columns)
}

fn read_row_stream(
    ndb: &NodeDatabase,
    heap: &HeapOnNode,
    hnids: &mut HnidResolver<'_>,
    hnid_rows: u32,
    row_count: usize,
    row_width: usize,
) -> Result<Vec<Vec<u8>>> {
    let hid = Hid::from_raw(hnid_rows);
    if hid.hid_type() == 0 {
        let expected = row_count * row_width;
        let slot = heap.heap_data(hid).unwrap_or_default();
        if slot.len() != expected {
            return Err(PstError::RowSizeMismatch { expected, found: slot.len() });
        }
        return Ok(slot.chunks_exact(row_width).map(<[u8]>::to_vec).collect());
    }

    let nid = Nid::from_raw(hnid_rows);
    let blocks = hnids.subnodes()?.read_blocks(ndb, nid)?;
    let variant = ndb.variant();
    let rows_per_block = (variant.max_block_size() - variant.block_trailer_size()) / row_width;

    let mut rows = Vec::with_capacity(row_count);
    for block in &blocks {
        for row in block.chunks_exact(row_width).take(rows_per_block) {
            if rows.len() >= row_count {
                return Err(PstError::DataOverflow(row_count));
            }
            rows.push(row.to_vec());
        }
    }
    if rows.len() < row_count {
        warn!(%nid, declared = row_count, found = rows.len(), "row data ends before the row index");
    }
    Ok(rows)
}

fn decode_row(
    raw: &[u8],
    columns: &[ColumnDescriptor],
    layout: &Layout,
    hnids: &mut HnidResolver<'_>,
) -> Result<Row> {
    let bitmap = raw
        .get(layout.bitmap_offset..layout.row_width)
        .ok_or_else(|| PstError::corrupt("cell existence bitmap outside the row"))?;

    let mut cells = Vec::with_capacity(columns.len());
    for column in columns {
        if !cell_exists(bitmap, column.cell_bit) {
            cells.push(None);
            continue;
        }
        let start = usize::from(column.offset);
        let cell = raw
            .get(start..start + usize::from(column.width))
            .ok_or_else(|| PstError::corrupt(format!("column {} lies outside the row", column.tag)))?;
        let value = if column.stores_hnid() {
            hnids.resolve(column.tag, cell)?
        } else {
            Some(decode_value(column.tag.ptype(), cell)?)
        };
        cells.push(value);
    }
    Ok(Row { cells })
}
