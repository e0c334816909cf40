//! Structural node scan.
//!
//! Walks every Node Index leaf and tries to decode what the node holds,
//! without knowing ahead of time what kind of object it is.  Failures are
//! recorded in the report instead of aborting the walk:
//!
//! | Outcome       | Meaning                                                        |
//! |---------------|----------------------------------------------------------------|
//! | `PropertyBag` | the heap is a property context and decoded cleanly              |
//! | `RowTable`    | the heap is a table context and decoded cleanly                 |
//! | `OtherHeap`   | a heap with a client we do not decode at this level            |
//! | `NoHeap`      | internal node whose data is not a heap                         |
//! | `Skipped`     | benign error: null data block, not a heap, unexpected client   |
//! | `Failed`      | any other error (CRC, structure, decompression, I/O)           |
//!
//! Only a failure to walk the Node Index itself is returned as an error.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::btree::NbtEntry;
use crate::error::{ErrorKind, PstError, Result};
use crate::heap::{ClientSignature, HeapOnNode};
use crate::ids::{Nid, NidType};
use crate::ndb::NodeDatabase;
use crate::property::{PropertyBag, RowTable};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeHealth {
    PropertyBag { properties: usize },
    RowTable { columns: usize, rows: usize },
    OtherHeap { client: ClientSignature },
    NoHeap,
    Skipped { reason: String },
    Failed { kind: ErrorKind, error: String },
}

impl NodeHealth {
    /// The node's contents were decoded (or needed no decoding).
    pub fn is_readable(&self) -> bool {
        !matches!(self, NodeHealth::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannedNode {
    pub nid: Nid,
    pub nid_type: NidType,
    pub parent: Nid,
    pub health: NodeHealth,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub total_nodes: usize,
    pub property_bags: usize,
    pub row_tables: usize,
    pub other_heaps: usize,
    pub no_heap: usize,
    pub skipped: usize,
    pub failed: usize,
    pub nodes: Vec<ScannedNode>,
}

impl ScanReport {
    pub fn from_nodes(nodes: Vec<ScannedNode>) -> Self {
        let mut report = ScanReport { total_nodes: nodes.len(), ..Default::default() };
        for node in &nodes {
            match node.health {
                NodeHealth::PropertyBag { .. } => report.property_bags += 1,
                NodeHealth::RowTable { .. } => report.row_tables += 1,
                NodeHealth::OtherHeap { .. } => report.other_heaps += 1,
                NodeHealth::NoHeap => report.no_heap += 1,
                NodeHealth::Skipped { .. } => report.skipped += 1,
                NodeHealth::Failed { .. } => report.failed += 1,
            }
        }
        report.nodes = nodes;
        report
    }

    /// Percentage of nodes that did not fail.
    pub fn health_pct(&self) -> f64 {
        if self.total_nodes == 0 {
            return 100.0;
        }
        (self.total_nodes - self.failed) as f64 * 100.0 / self.total_nodes as f64
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScannedNode> {
        self.nodes.iter().filter(|n| !n.health.is_readable())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} nodes: {} property bags, {} row tables, {} other heaps, {} without heap, \
             {} skipped, {} failed ({:.1}% healthy)",
            self.total_nodes,
            self.property_bags,
            self.row_tables,
            self.other_heaps,
            self.no_heap,
            self.skipped,
            self.failed,
            self.health_pct(),
        )
    }
}

// ── Scan ─────────────────────────────────────────────────────────────────────

/// Classify every node in the Node Index.
pub fn scan(ndb: &Arc<NodeDatabase>) -> Result<ScanReport> {
    let entries = ndb.node_index().entries().collect::<Result<Vec<NbtEntry>>>()?;
    debug!(nodes = entries.len(), "scanning node index");

    #[cfg(feature = "parallel")]
    let nodes: Vec<ScannedNode> = {
        use rayon::prelude::*;
        entries.par_iter().map(|node| classify(ndb, node)).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let nodes: Vec<ScannedNode> = entries.iter().map(|node| classify(ndb, node)).collect();

    let report = ScanReport::from_nodes(nodes);
    info!(
        total = report.total_nodes,
        skipped = report.skipped,
        failed = report.failed,
        "scan complete"
    );
    Ok(report)
}

fn classify(ndb: &Arc<NodeDatabase>, node: &NbtEntry) -> ScannedNode {
    let health = if !node.nid.has_heap() {
        NodeHealth::NoHeap
    } else {
        match probe(ndb, node) {
            Ok(health) => health,
            Err(e) if e.is_benign() => {
                debug!(nid = %node.nid, reason = %e, "skipping node");
                NodeHealth::Skipped { reason: e.to_string() }
            }
            Err(e) => {
                warn!(nid = %node.nid, error = %e, "node failed to decode");
                NodeHealth::Failed { kind: e.kind(), error: e.to_string() }
            }
        }
    };
    ScannedNode {
        nid: node.nid,
        nid_type: node.nid.nid_type(),
        parent: node.parent,
        health,
    }
}

fn probe(ndb: &Arc<NodeDatabase>, node: &NbtEntry) -> Result<NodeHealth> {
    if node.data.is_null() {
        return Err(PstError::NullDataBlock(node.nid));
    }
    let heap = HeapOnNode::read(ndb, node.data)?;
    Ok(match heap.client_signature() {
        ClientSignature::PropertyContext => {
            let bag = PropertyBag::from_node(ndb, node)?;
            NodeHealth::PropertyBag { properties: bag.len() }
        }
        ClientSignature::TableContext => {
            let table = RowTable::from_node(ndb, node)?;
            NodeHealth::RowTable { columns: table.columns().len(), rows: table.row_count() }
        }
        client => NodeHealth::OtherHeap { client },
    })
}
