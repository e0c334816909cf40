//! Paged B-trees: the Block Index and the Node Index.
//!
//! One generic page reader serves both trees; the leaf record shape comes from
//! the [`LeafEntry`] implementation ([`BbtEntry`] or [`NbtEntry`]).  Two
//! strategies implement [`PagedIndex`] over the same pages:
//!
//! - [`EagerIndex`] reads every page once and keeps the whole tree.
//! - [`FinderIndex`] keeps only the root and re-reads pages per call.
//!
//! Both must return the same leaves, in the same order.
//!
//! # Search
//!
//! Descent picks the last intermediate record whose key is at or below the
//! target.  A key below the first record of the root has no home and yields
//! `None`.  Every child page must sit exactly one level below its parent.

mod eager;
mod entry;
mod finder;
mod page;

pub use eager::EagerIndex;
pub use entry::{BbtEntry, BtEntry, LeafEntry, NbtEntry};
pub use finder::FinderIndex;
pub use page::{choose_child, Page, PageBody, PageMeta};

use std::sync::Arc;

use crate::block::BlockStore;
use crate::error::Result;
use crate::ids::Bref;
use crate::options::IndexMode;

/// Lookup and in-order traversal over a paged B-tree.
pub trait PagedIndex<E>: Send + Sync {
    fn find(&self, key: u64) -> Result<Option<E>>;

    /// Leaves in key order.  Page read failures surface as items.
    fn entries(&self) -> Box<dyn Iterator<Item = Result<E>> + '_>;

    fn mode(&self) -> IndexMode;
}

/// Build the index for `root` in the requested mode.
pub fn open_index<E: LeafEntry>(
    store: &Arc<BlockStore>,
    root: Bref,
    mode: IndexMode,
) -> Result<Box<dyn PagedIndex<E>>> {
    Ok(match mode {
        IndexMode::Eager => Box::new(EagerIndex::<E>::load(store, root)?),
        IndexMode::OnDemand => Box::new(FinderIndex::<E>::new(Arc::clone(store), root)),
    })
}
