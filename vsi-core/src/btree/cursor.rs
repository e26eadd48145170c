//! Process-local B-tree iterators. They hold raw pointers into a region's
//! mapping and must never be persisted or shared across processes.

use super::{Btree, BtreeRecord};
use crate::offset::Offset;

/// A cursor over in-order positions, navigated via parent pointers so it
/// never materializes more of the tree than the path to its current node.
pub struct BtreeCursor<'a, R: BtreeRecord> {
    tree: &'a Btree<R>,
    pos: Option<(Offset, usize)>,
    // Raw-pointer-shaped state inside `tree`/`pos` already makes this type
    // `!Send`/`!Sync`; the marker documents that this is intentional.
    _not_shareable: std::marker::PhantomData<*const ()>,
}

impl<'a, R: BtreeRecord> BtreeCursor<'a, R> {
    pub(super) fn new(tree: &'a Btree<R>, pos: Option<(Offset, usize)>) -> Self {
        BtreeCursor {
            tree,
            pos,
            _not_shareable: std::marker::PhantomData,
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos.is_none()
    }

    pub fn data(&self) -> Option<R> {
        let (off, idx) = self.pos?;
        let node = self.tree.node_at(off);
        Some(node.key(idx))
    }

    pub fn next(&mut self) -> Option<R> {
        let (off, idx) = self.pos?;
        self.pos = self.tree.successor_position(off, idx);
        self.data()
    }

    pub fn previous(&mut self) -> Option<R> {
        let (off, idx) = self.pos?;
        self.pos = self.tree.predecessor_position(off, idx);
        self.data()
    }
}
