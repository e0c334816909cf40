//! [`PstFile`]: the owning handle and the crate's main entry point.
//!
//! ```no_run
//! use pstkit::{DecodeOptions, Nid, PstFile};
//!
//! let pst = PstFile::open("mailbox.pst", DecodeOptions::default())?;
//! let store = pst.property_bag(Nid::MESSAGE_STORE)?;
//! for (tag, value) in store.iter() {
//!     println!("{tag} {value}");
//! }
//! # Ok::<(), pstkit::PstError>(())
//! ```
//!
//! The underlying file is closed when the handle is dropped.  Values that
//! were deferred to a subnode keep the node database alive until they are
//! dropped too.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use crate::btree::NbtEntry;
use crate::error::Result;
use crate::format::FormatVariant;
use crate::header::{Header, HEADER_SIZE_UNICODE};
use crate::ids::Nid;
use crate::named::NamedPropertyMap;
use crate::ndb::NodeDatabase;
use crate::options::DecodeOptions;
use crate::property::{PropertyBag, RowTable};
use crate::scan::{self, ScanReport};
use crate::source::{ReadAt, SeekSource};
use crate::subnode::SubnodeTree;

pub struct PstFile {
    header: Header,
    ndb: Arc<NodeDatabase>,
}

impl PstFile {
    pub fn open<P: AsRef<Path>>(path: P, options: DecodeOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }

    pub fn from_reader<R: Read + Seek + Send + 'static>(reader: R, options: DecodeOptions) -> Result<Self> {
        Self::from_source(Box::new(SeekSource::new(reader)), options)
    }

    /// Open over any positioned byte source.  On error the source is dropped
    /// before returning.
    pub fn from_source(source: Box<dyn ReadAt>, options: DecodeOptions) -> Result<Self> {
        let head_len = source.len()?.min(HEADER_SIZE_UNICODE as u64) as usize;
        let head = source.read_vec(0, head_len)?;
        let header = Header::parse(&head, &options)?;
        let ndb = NodeDatabase::open(source, &header, options)?;
        Ok(Self { header, ndb: Arc::new(ndb) })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn variant(&self) -> FormatVariant {
        self.header.variant
    }

    pub fn options(&self) -> &DecodeOptions {
        self.ndb.options()
    }

    pub fn ndb(&self) -> &Arc<NodeDatabase> {
        &self.ndb
    }

    pub fn node(&self, nid: Nid) -> Result<NbtEntry> {
        self.ndb.node(nid)
    }

    /// Every Node Index leaf, in key order.
    pub fn nodes(&self) -> impl Iterator<Item = Result<NbtEntry>> + '_ {
        self.ndb.node_index().entries()
    }

    pub fn property_bag(&self, nid: Nid) -> Result<PropertyBag> {
        PropertyBag::read(&self.ndb, nid)
    }

    pub fn row_table(&self, nid: Nid) -> Result<RowTable> {
        RowTable::read(&self.ndb, nid)
    }

    pub fn subnodes(&self, nid: Nid) -> Result<SubnodeTree> {
        let node = self.ndb.node(nid)?;
        SubnodeTree::read(&self.ndb, node.subnode)
    }

    pub fn named_properties(&self) -> Result<NamedPropertyMap> {
        NamedPropertyMap::read(&self.ndb)
    }

    pub fn message_store(&self) -> Result<PropertyBag> {
        self.property_bag(Nid::MESSAGE_STORE)
    }

    pub fn root_folder(&self) -> Result<PropertyBag> {
        self.property_bag(Nid::ROOT_FOLDER)
    }

    /// Classify every node; see [`crate::scan`].
    pub fn scan(&self) -> Result<ScanReport> {
        scan::scan(&self.ndb)
    }
}
