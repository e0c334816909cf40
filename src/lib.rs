pub mod error;
pub mod options;
pub mod fields;
pub mod format;
pub mod ids;
pub mod crc;
pub mod crypto;
pub mod source;
pub mod header;
pub mod block;
pub mod btree;
pub mod ndb;
pub mod heap;
pub mod bth;
pub mod subnode;
pub mod property;
pub mod named;
pub mod file;
pub mod scan;

pub use error::{ErrorKind, PstError, Result};
pub use options::{DecodeOptions, IndexMode};
pub use format::FormatVariant;
pub use ids::{Bid, Bref, Ib, Nid, NidType};
pub use header::Header;
pub use crypto::Encryption;
pub use source::{ReadAt, SeekSource};
pub use btree::{BbtEntry, NbtEntry, PagedIndex};
pub use ndb::NodeDatabase;
pub use heap::{ClientSignature, HeapOnNode, Hid};
pub use bth::BTreeOnHeap;
pub use subnode::{SubnodeEntry, SubnodeTree};
pub use property::{PropertyBag, PropertyTag, PropertyType, PropertyValue, Row, RowTable};
pub use named::{NamedProperty, NamedPropertyMap, PropertyName};
pub use file::PstFile;
pub use scan::{NodeHealth, ScanReport};
