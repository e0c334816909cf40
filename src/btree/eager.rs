use tracing::debug;

use crate::block::BlockStore;
use crate::error::Result;
use crate::ids::Bref;
use crate::options::IndexMode;

use super::entry::LeafEntry;
use super::page::{Page, PageBody};
use super::PagedIndex;

#[derive(Debug)]
enum Node<E> {
    Leaf(Vec<E>),
    Branch(Vec<(u64, Node<E>)>),
}

impl<E> Node<E> {
    fn leaves(&self) -> Box<dyn Iterator<Item = &E> + '_> {
        match self {
            Node::Leaf(entries) => Box::new(entries.iter()),
            Node::Branch(children) => Box::new(children.iter().flat_map(|(_, n)| n.leaves())),
        }
    }
}

/// The whole tree, read at construction.
#[derive(Debug)]
pub struct EagerIndex<E> {
    root: Node<E>,
    len: usize,
}

impl<E: LeafEntry> EagerIndex<E> {
    pub fn load(store: &BlockStore, root: Bref) -> Result<Self> {
        let root = load_node::<E>(store, root, None)?;
        let len = root.leaves().count();
        debug!(%len, page_type = ?E::PAGE_TYPE, "loaded paged b-tree");
        Ok(Self { root, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn load_node<E: LeafEntry>(store: &BlockStore, bref: Bref, expected_level: Option<u8>) -> Result<Node<E>> {
    let page = Page::<E>::read(store, bref, expected_level)?;
    Ok(match page.body {
        PageBody::Leaves(entries) => Node::Leaf(entries),
        PageBody::Branches(children) => {
            let below = page.level - 1;
            let nodes = children
                .into_iter()
                .map(|c| Ok((c.key, load_node::<E>(store, c.child, Some(below))?)))
                .collect::<Result<Vec<_>>>()?;
            Node::Branch(nodes)
        }
    })
}

impl<E: LeafEntry> PagedIndex<E> for EagerIndex<E> {
    fn find(&self, key: u64) -> Result<Option<E>> {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(entries) => return Ok(entries.iter().find(|e| e.key() == key).cloned()),
                Node::Branch(children) => {
                    match children.iter().take_while(|(k, _)| *k <= key).last() {
                        Some((_, child)) => node = child,
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<E>> + '_> {
        Box::new(self.root.leaves().map(|e| Ok(e.clone())))
    }

    fn mode(&self) -> IndexMode {
        IndexMode::Eager
    }
}
