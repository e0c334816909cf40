use std::marker::PhantomData;
use std::sync::Arc;

use crate::block::BlockStore;
use crate::error::Result;
use crate::ids::Bref;
use crate::options::IndexMode;

use super::entry::{BtEntry, LeafEntry};
use super::page::{choose_child, Page, PageBody};
use super::PagedIndex;

/// Holds only the root reference; every call walks pages from the store.
pub struct FinderIndex<E> {
    store: Arc<BlockStore>,
    root: Bref,
    _entry: PhantomData<fn() -> E>,
}

impl<E: LeafEntry> FinderIndex<E> {
    pub fn new(store: Arc<BlockStore>, root: Bref) -> Self {
        Self { store, root, _entry: PhantomData }
    }

    pub fn root(&self) -> Bref {
        self.root
    }
}

impl<E: LeafEntry> PagedIndex<E> for FinderIndex<E> {
    fn find(&self, key: u64) -> Result<Option<E>> {
        let mut bref = self.root;
        let mut expected = None;
        loop {
            let page = Page::<E>::read(&self.store, bref, expected)?;
            match page.body {
                PageBody::Leaves(entries) => return Ok(entries.into_iter().find(|e| e.key() == key)),
                PageBody::Branches(children) => match choose_child(&children, key) {
                    Some(child) => {
                        bref = child.child;
                        expected = Some(page.level - 1);
                    }
                    None => return Ok(None),
                },
            }
        }
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<E>> + '_> {
        Box::new(Walk::<E> {
            store: &self.store,
            pending_root: Some(self.root),
            stack: Vec::new(),
            leaves: Vec::new().into_iter(),
        })
    }

    fn mode(&self) -> IndexMode {
        IndexMode::OnDemand
    }
}

/// Depth-first page walk that reads each page only when reached.
struct Walk<'a, E> {
    store: &'a BlockStore,
    pending_root: Option<Bref>,
    stack: Vec<(u8, std::vec::IntoIter<BtEntry>)>,
    leaves: std::vec::IntoIter<E>,
}

impl<E: LeafEntry> Walk<'_, E> {
    fn next_page(&mut self) -> Option<(Bref, Option<u8>)> {
        if let Some(root) = self.pending_root.take() {
            return Some((root, None));
        }
        while let Some((level, children)) = self.stack.last_mut() {
            match children.next() {
                Some(child) => return Some((child.child, Some(*level - 1))),
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

impl<E: LeafEntry> Iterator for Walk<'_, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.leaves.next() {
                return Some(Ok(entry));
            }
            let (bref, expected) = self.next_page()?;
            match Page::<E>::read(self.store, bref, expected) {
                Ok(page) => match page.body {
                    PageBody::Leaves(entries) => self.leaves = entries.into_iter(),
                    PageBody::Branches(children) => self.stack.push((page.level, children.into_iter())),
                },
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}
