//! Generic in-place B-tree over shared memory.
//!
//! A runtime `{type, offset, direction}` key-field list would need a
//! per-process vtable to compare records; this resolves the comparison at
//! compile time through the [`BtreeRecord`] trait instead, as ordinary Rust
//! generics rather than a runtime-interpreted comparator.

pub mod cursor;
mod node;

pub use cursor::BtreeCursor;

use crate::error::VsiResult;
use crate::offset::Offset;
use crate::region::Region;
use bytemuck::{Pod, Zeroable};
use node::NodeView;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A record a [`Btree`] can store: `Copy` and POD so it can be written into
/// a node slot with a raw, unaligned store, plus a compile-time key
/// extractor that replaces the source's runtime field-list comparator.
pub trait BtreeRecord: Copy + Pod + Zeroable {
    type Key: Ord + Copy;
    fn key(&self) -> Self::Key;
}

/// Supplies node storage to a [`Btree`]. Implemented by
/// [`crate::sys_allocator::SysAllocator`] (fixed-size nodes) and by
/// [`crate::user_allocator::UserAllocator`] (general allocation) — a tree's
/// node source depends on which region it lives in.
pub trait BtreeAllocator: Send + Sync {
    fn alloc_node(&self, size: u64) -> VsiResult<Offset>;
    fn free_node(&self, offset: Offset, size: u64) -> VsiResult<()>;
    fn region(&self) -> &Region;
}

/// Persistent, shared-memory descriptor for one tree: minimum degree,
/// derived `max`/`min` key counts, node size, record count, and root
/// offset.
#[repr(C)]
pub struct BtreeDescriptor {
    min_degree: AtomicU64,
    max_keys: AtomicU64,
    min_keys: AtomicU64,
    node_size: AtomicU64,
    record_count: AtomicU64,
    root: AtomicU64,
}

impl BtreeDescriptor {
    pub fn size() -> usize {
        size_of::<BtreeDescriptor>()
    }
}

/// The node size a `Btree<R>` with the given minimum degree needs — used
/// by allocator setup to size the system region's fixed-node pool.
pub fn node_size_for_record<R: BtreeRecord>(min_degree: usize) -> u64 {
    let t = min_degree.max(2);
    let max = 2 * t - 1;
    node::node_size_for(max, size_of::<R>())
}

pub struct Btree<R: BtreeRecord> {
    allocator: Arc<dyn BtreeAllocator>,
    descriptor: *mut BtreeDescriptor,
    node_size: u64,
    max: usize,
    min: usize,
    _marker: PhantomData<R>,
}

// SAFETY: every mutating operation on a `Btree` is serialized by a region
// lock held by the owning allocator/store (UserAllocator's region lock for
// the free-chunk trees, the region lock again for the SignalStore registry
// tree) — the tree itself holds no lock and relies on its caller to
// serialize access.
unsafe impl<R: BtreeRecord> Send for Btree<R> {}
unsafe impl<R: BtreeRecord> Sync for Btree<R> {}

impl<R: BtreeRecord> Btree<R> {
    /// Initializes a fresh tree descriptor in place. `min_degree` is fixed
    /// for the lifetime of the region; rounding to an odd key count is
    /// implicit since `2t - 1` is always odd.
    ///
    /// # Safety
    /// `descriptor` must point at memory reserved exclusively for this
    /// tree's descriptor and not yet observed by any other process.
    pub unsafe fn create(
        descriptor: *mut BtreeDescriptor,
        allocator: Arc<dyn BtreeAllocator>,
        min_degree: usize,
    ) -> Self {
        let t = min_degree.max(2);
        let max = 2 * t - 1;
        let min = t - 1;
        let node_size = node::node_size_for(max, size_of::<R>());
        let d = &*descriptor;
        d.min_degree.store(t as u64, Ordering::Relaxed);
        d.max_keys.store(max as u64, Ordering::Relaxed);
        d.min_keys.store(min as u64, Ordering::Relaxed);
        d.node_size.store(node_size, Ordering::Relaxed);
        d.record_count.store(0, Ordering::Relaxed);
        d.root.store(Offset::NULL.get(), Ordering::Relaxed);
        Btree {
            allocator,
            descriptor,
            node_size,
            max,
            min,
            _marker: PhantomData,
        }
    }

    /// Attaches to an existing tree descriptor, reading its fixed shape
    /// back out rather than recomputing it.
    ///
    /// # Safety
    /// `descriptor` must point at a tree descriptor previously initialized
    /// by [`Self::create`].
    pub unsafe fn open(descriptor: *mut BtreeDescriptor, allocator: Arc<dyn BtreeAllocator>) -> Self {
        let d = &*descriptor;
        Btree {
            allocator,
            descriptor,
            node_size: d.node_size.load(Ordering::Relaxed),
            max: d.max_keys.load(Ordering::Relaxed) as usize,
            min: d.min_keys.load(Ordering::Relaxed) as usize,
            _marker: PhantomData,
        }
    }

    fn descriptor(&self) -> &BtreeDescriptor {
        unsafe { &*self.descriptor }
    }

    pub fn len(&self) -> u64 {
        self.descriptor().record_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn root_offset(&self) -> Offset {
        Offset(self.descriptor().root.load(Ordering::Relaxed))
    }

    fn set_root(&self, offset: Offset) {
        self.descriptor().root.store(offset.get(), Ordering::Relaxed);
    }

    fn node_at(&self, offset: Offset) -> NodeView<R> {
        let ptr = self.allocator.region().to_address(offset);
        // SAFETY: `offset` always refers to a block `self.node_size` bytes
        // long allocated by `alloc_node` below.
        unsafe { NodeView::new(ptr, self.max, size_of::<R>()) }
    }

    fn alloc_node(&self) -> VsiResult<Offset> {
        let off = self.allocator.alloc_node(self.node_size)?;
        let node = self.node_at(off);
        node.set_num_keys(0);
        node.set_level(0);
        node.set_parent(Offset::NULL);
        node.set_next(Offset::NULL);
        for i in 0..=self.max {
            node.set_child(i, Offset::NULL);
        }
        Ok(off)
    }

    fn free_node(&self, offset: Offset) -> VsiResult<()> {
        self.allocator.free_node(offset, self.node_size)
    }

    fn ensure_root(&self) -> VsiResult<Offset> {
        let r = self.root_offset();
        if r.is_null() {
            let new_root = self.alloc_node()?;
            self.set_root(new_root);
            Ok(new_root)
        } else {
            Ok(r)
        }
    }

    // ---- insert -----------------------------------------------------

    pub fn insert(&self, rec: R) -> VsiResult<()> {
        let root = self.ensure_root()?;
        let root_view = self.node_at(root);
        if root_view.num_keys() == self.max {
            let new_root_off = self.alloc_node()?;
            let new_root = self.node_at(new_root_off);
            new_root.set_level(root_view.level() + 1);
            new_root.set_child(0, root);
            root_view.set_parent(new_root_off);
            self.set_root(new_root_off);
            self.split_child(new_root_off, 0)?;
            self.insert_nonfull(new_root_off, rec)?;
        } else {
            self.insert_nonfull(root, rec)?;
        }
        self.descriptor().record_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn split_child(&self, x_off: Offset, i: usize) -> VsiResult<()> {
        let t = self.min + 1;
        let x = self.node_at(x_off);
        let y_off = x.child(i);
        let y = self.node_at(y_off);

        let z_off = self.alloc_node()?;
        let z = self.node_at(z_off);
        z.set_level(y.level());

        for j in 0..self.min {
            z.set_key(j, y.key(j + t));
        }
        if !y.is_leaf() {
            for j in 0..=self.min {
                let child_off = y.child(j + t);
                z.set_child(j, child_off);
                if !child_off.is_null() {
                    self.node_at(child_off).set_parent(z_off);
                }
            }
        }
        z.set_num_keys(self.min);

        let median = y.key(t - 1);
        y.set_num_keys(t - 1);

        let x_keys = x.num_keys();
        x.shift_children_right(i + 1, x_keys + 1);
        x.set_child(i + 1, z_off);
        x.shift_keys_right(i, x_keys);
        x.set_key(i, median);
        x.set_num_keys(x_keys + 1);

        z.set_parent(x_off);
        y.set_parent(x_off);
        Ok(())
    }

    fn insert_nonfull(&self, start: Offset, rec: R) -> VsiResult<()> {
        let mut cur = start;
        loop {
            let x = self.node_at(cur);
            let n = x.num_keys();
            let mut i = n;
            while i > 0 && x.key(i - 1).key() > rec.key() {
                i -= 1;
            }
            if x.is_leaf() {
                x.shift_keys_right(i, n);
                x.set_key(i, rec);
                x.set_num_keys(n + 1);
                return Ok(());
            }
            let child_off = x.child(i);
            let child = self.node_at(child_off);
            let target = if child.num_keys() == self.max {
                self.split_child(cur, i)?;
                let x_after = self.node_at(cur);
                if rec.key() > x_after.key(i).key() {
                    x_after.child(i + 1)
                } else {
                    x_after.child(i)
                }
            } else {
                child_off
            };
            cur = target;
        }
    }

    // ---- search / find / rfind --------------------------------------

    pub fn search(&self, key: R::Key) -> Option<R> {
        let mut cur = self.root_offset();
        while !cur.is_null() {
            let node = self.node_at(cur);
            let n = node.num_keys();
            let mut i = 0;
            while i < n && key > node.key(i).key() {
                i += 1;
            }
            if i < n && key == node.key(i).key() {
                return Some(node.key(i));
            }
            if node.is_leaf() {
                return None;
            }
            cur = node.child(i);
        }
        None
    }

    /// Smallest record with key `>= key`.
    pub fn find(&self, key: R::Key) -> Option<R> {
        let mut cur = self.root_offset();
        let mut best = None;
        while !cur.is_null() {
            let node = self.node_at(cur);
            let n = node.num_keys();
            let mut i = 0;
            while i < n && node.key(i).key() < key {
                i += 1;
            }
            if i < n {
                best = Some(node.key(i));
                if node.key(i).key() == key {
                    return best;
                }
            }
            if node.is_leaf() {
                break;
            }
            cur = node.child(i);
        }
        best
    }

    /// Largest record with key `<= key`.
    pub fn rfind(&self, key: R::Key) -> Option<R> {
        let mut cur = self.root_offset();
        let mut best = None;
        while !cur.is_null() {
            let node = self.node_at(cur);
            let n = node.num_keys();
            let mut i = n;
            while i > 0 && node.key(i - 1).key() > key {
                i -= 1;
            }
            if i > 0 {
                best = Some(node.key(i - 1));
                if node.key(i - 1).key() == key {
                    return best;
                }
            }
            if node.is_leaf() {
                break;
            }
            cur = node.child(i);
        }
        best
    }

    pub fn traverse<F: FnMut(R)>(&self, mut cb: F) {
        self.traverse_node(self.root_offset(), &mut cb);
    }

    fn traverse_node<F: FnMut(R)>(&self, off: Offset, cb: &mut F) {
        if off.is_null() {
            return;
        }
        let node = self.node_at(off);
        let n = node.num_keys();
        for i in 0..n {
            if !node.is_leaf() {
                self.traverse_node(node.child(i), cb);
            }
            cb(node.key(i));
        }
        if !node.is_leaf() {
            self.traverse_node(node.child(n), cb);
        }
    }

    // ---- cursors ------------------------------------------------------

    pub fn begin(&self) -> BtreeCursor<'_, R> {
        let mut cur = self.root_offset();
        if cur.is_null() {
            return BtreeCursor::new(self, None);
        }
        loop {
            let node = self.node_at(cur);
            if node.is_leaf() {
                if node.num_keys() == 0 {
                    return BtreeCursor::new(self, None);
                }
                return BtreeCursor::new(self, Some((cur, 0)));
            }
            cur = node.child(0);
        }
    }

    pub fn find_cursor(&self, key: R::Key) -> BtreeCursor<'_, R> {
        BtreeCursor::new(self, self.find_position(key))
    }

    pub fn rfind_cursor(&self, key: R::Key) -> BtreeCursor<'_, R> {
        BtreeCursor::new(self, self.rfind_position(key))
    }

    fn find_position(&self, key: R::Key) -> Option<(Offset, usize)> {
        let mut cur = self.root_offset();
        let mut best = None;
        while !cur.is_null() {
            let node = self.node_at(cur);
            let n = node.num_keys();
            let mut i = 0;
            while i < n && node.key(i).key() < key {
                i += 1;
            }
            if i < n {
                best = Some((cur, i));
                if node.key(i).key() == key {
                    return best;
                }
            }
            if node.is_leaf() {
                break;
            }
            cur = node.child(i);
        }
        best
    }

    fn rfind_position(&self, key: R::Key) -> Option<(Offset, usize)> {
        let mut cur = self.root_offset();
        let mut best = None;
        while !cur.is_null() {
            let node = self.node_at(cur);
            let n = node.num_keys();
            let mut i = n;
            while i > 0 && node.key(i - 1).key() > key {
                i -= 1;
            }
            if i > 0 {
                best = Some((cur, i - 1));
                if node.key(i - 1).key() == key {
                    return best;
                }
            }
            if node.is_leaf() {
                break;
            }
            cur = node.child(i);
        }
        best
    }

    /// In-order successor position, walking up via parent pointers so no
    /// more of the tree is touched than the path from `(off, idx)`.
    pub(crate) fn successor_position(&self, off: Offset, idx: usize) -> Option<(Offset, usize)> {
        let node = self.node_at(off);
        if !node.is_leaf() {
            let mut cur = node.child(idx + 1);
            loop {
                let n = self.node_at(cur);
                if n.is_leaf() {
                    return Some((cur, 0));
                }
                cur = n.child(0);
            }
        }
        if idx + 1 < node.num_keys() {
            return Some((off, idx + 1));
        }
        let mut child_off = off;
        let mut parent_off = node.parent();
        while !parent_off.is_null() {
            let parent = self.node_at(parent_off);
            let ci = self.child_index(&parent, child_off);
            if ci < parent.num_keys() {
                return Some((parent_off, ci));
            }
            child_off = parent_off;
            parent_off = parent.parent();
        }
        None
    }

    /// In-order predecessor position, symmetric to [`Self::successor_position`].
    pub(crate) fn predecessor_position(&self, off: Offset, idx: usize) -> Option<(Offset, usize)> {
        let node = self.node_at(off);
        if !node.is_leaf() {
            let mut cur = node.child(idx);
            loop {
                let n = self.node_at(cur);
                if n.is_leaf() {
                    return Some((cur, n.num_keys() - 1));
                }
                cur = n.child(n.num_keys());
            }
        }
        if idx > 0 {
            return Some((off, idx - 1));
        }
        let mut child_off = off;
        let mut parent_off = node.parent();
        while !parent_off.is_null() {
            let parent = self.node_at(parent_off);
            let ci = self.child_index(&parent, child_off);
            if ci > 0 {
                return Some((parent_off, ci - 1));
            }
            child_off = parent_off;
            parent_off = parent.parent();
        }
        None
    }

    fn child_index(&self, parent: &NodeView<R>, child_off: Offset) -> usize {
        let n = parent.num_keys();
        for i in 0..=n {
            if parent.child(i).get() == child_off.get() {
                return i;
            }
        }
        n
    }

    // ---- delete ---------------------------------------------------------

    /// Deletes the record matching `key`, returning whether one was found.
    pub fn delete(&self, key: R::Key) -> VsiResult<bool> {
        let root = self.root_offset();
        if root.is_null() {
            return Ok(false);
        }
        let found = self.delete_from(root, key)?;
        if found {
            self.descriptor().record_count.fetch_sub(1, Ordering::Relaxed);
            let root_view = self.node_at(self.root_offset());
            if root_view.num_keys() == 0 {
                if root_view.is_leaf() {
                    // Tree became empty; keep the (now-empty) root node so
                    // a concurrent reader never sees a null root oscillate
                    // mid-delete.
                } else {
                    let only_child = root_view.child(0);
                    self.node_at(only_child).set_parent(Offset::NULL);
                    self.set_root(only_child);
                    self.free_node(self.root_offset())?;
                }
            }
        }
        Ok(found)
    }

    fn delete_from(&self, node_off: Offset, key: R::Key) -> VsiResult<bool> {
        let node = self.node_at(node_off);
        let n = node.num_keys();
        let mut i = 0;
        while i < n && node.key(i).key() < key {
            i += 1;
        }

        if i < n && node.key(i).key() == key {
            if node.is_leaf() {
                node.shift_keys_left(i, n);
                node.set_num_keys(n - 1);
                return Ok(true);
            }
            return self.delete_internal_key(node_off, i);
        }

        if node.is_leaf() {
            return Ok(false);
        }

        let child_off = self.fill_child(node_off, i)?;
        self.delete_from(child_off, key)
    }

    fn delete_internal_key(&self, node_off: Offset, i: usize) -> VsiResult<bool> {
        let node = self.node_at(node_off);
        let left = node.child(i);
        let right = node.child(i + 1);

        if self.node_at(left).num_keys() > self.min {
            let pred = self.max_key_in_subtree(left);
            node.set_key(i, pred);
            self.delete_from(left, pred.key())?;
        } else if self.node_at(right).num_keys() > self.min {
            let succ = self.min_key_in_subtree(right);
            node.set_key(i, succ);
            self.delete_from(right, succ.key())?;
        } else {
            let removed_key = node.key(i).key();
            self.merge_children(node_off, i)?;
            self.delete_from(left, removed_key)?;
        }
        Ok(true)
    }

    fn max_key_in_subtree(&self, off: Offset) -> R {
        let mut cur = off;
        loop {
            let node = self.node_at(cur);
            if node.is_leaf() {
                return node.key(node.num_keys() - 1);
            }
            cur = node.child(node.num_keys());
        }
    }

    fn min_key_in_subtree(&self, off: Offset) -> R {
        let mut cur = off;
        loop {
            let node = self.node_at(cur);
            if node.is_leaf() {
                return node.key(0);
            }
            cur = node.child(0);
        }
    }

    /// Ensures `node.child(i)` has more than `min` keys before descending
    /// into it, borrowing from a sibling or merging if neither has a
    /// surplus, and returns the (possibly merged) child offset to recurse
    /// into.
    fn fill_child(&self, node_off: Offset, i: usize) -> VsiResult<Offset> {
        let node = self.node_at(node_off);
        let child_off = node.child(i);
        if self.node_at(child_off).num_keys() > self.min {
            return Ok(child_off);
        }

        let has_left = i > 0 && self.node_at(node.child(i - 1)).num_keys() > self.min;
        let has_right =
            i < node.num_keys() && self.node_at(node.child(i + 1)).num_keys() > self.min;

        if has_left {
            self.borrow_from_prev(node_off, i);
            Ok(child_off)
        } else if has_right {
            self.borrow_from_next(node_off, i);
            Ok(child_off)
        } else if i < node.num_keys() {
            self.merge_children(node_off, i)?;
            Ok(child_off)
        } else {
            self.merge_children(node_off, i - 1)?;
            Ok(node.child(i - 1))
        }
    }

    fn borrow_from_prev(&self, node_off: Offset, i: usize) {
        let node = self.node_at(node_off);
        let child = self.node_at(node.child(i));
        let sibling = self.node_at(node.child(i - 1));
        let sib_n = sibling.num_keys();

        let cn = child.num_keys();
        child.shift_keys_right(0, cn);
        child.set_key(0, node.key(i - 1));
        if !child.is_leaf() {
            child.shift_children_right(0, cn + 1);
            let moved_child = sibling.child(sib_n);
            child.set_child(0, moved_child);
            if !moved_child.is_null() {
                self.node_at(moved_child).set_parent(node.child(i));
            }
        }
        child.set_num_keys(cn + 1);

        node.set_key(i - 1, sibling.key(sib_n - 1));
        sibling.set_num_keys(sib_n - 1);
    }

    fn borrow_from_next(&self, node_off: Offset, i: usize) {
        let node = self.node_at(node_off);
        let child = self.node_at(node.child(i));
        let sibling = self.node_at(node.child(i + 1));
        let cn = child.num_keys();

        child.set_key(cn, node.key(i));
        if !child.is_leaf() {
            let moved_child = sibling.child(0);
            child.set_child(cn + 1, moved_child);
            if !moved_child.is_null() {
                self.node_at(moved_child).set_parent(node.child(i));
            }
        }
        child.set_num_keys(cn + 1);

        let sib_n = sibling.num_keys();
        node.set_key(i, sibling.key(0));
        sibling.shift_keys_left(0, sib_n);
        if !sibling.is_leaf() {
            sibling.shift_children_left(0, sib_n + 1);
        }
        sibling.set_num_keys(sib_n - 1);
    }

    /// Merges `node.child(i)`, the separator key `node.key(i)`, and
    /// `node.child(i+1)` into `node.child(i)`, freeing the right sibling.
    fn merge_children(&self, node_off: Offset, i: usize) -> VsiResult<()> {
        let node = self.node_at(node_off);
        let left_off = node.child(i);
        let right_off = node.child(i + 1);
        let left = self.node_at(left_off);
        let right = self.node_at(right_off);

        let ln = left.num_keys();
        let rn = right.num_keys();

        left.set_key(ln, node.key(i));
        for j in 0..rn {
            left.set_key(ln + 1 + j, right.key(j));
        }
        if !left.is_leaf() {
            for j in 0..=rn {
                let moved = right.child(j);
                left.set_child(ln + 1 + j, moved);
                if !moved.is_null() {
                    self.node_at(moved).set_parent(left_off);
                }
            }
        }
        left.set_num_keys(ln + 1 + rn);

        let nn = node.num_keys();
        node.shift_keys_left(i, nn);
        node.shift_children_left(i + 1, nn + 1);
        node.set_num_keys(nn - 1);

        self.free_node(right_off)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionKind;
    use crate::sys_allocator::SysAllocator;
    use std::sync::Arc;

    #[derive(Copy, Clone, Pod, Zeroable)]
    #[repr(C)]
    struct Rec {
        key: u64,
        value: u64,
    }

    impl BtreeRecord for Rec {
        type Key = u64;
        fn key(&self) -> Self::Key {
            self.key
        }
    }

    /// A fresh `Btree<Rec>` plus the leaked `BtreeDescriptor`/regions it
    /// needs to stay alive for the test's duration. Small minimum degree
    /// (3) so a few dozen keys are enough to exercise splits and merges.
    fn make_tree(min_degree: usize) -> Btree<Rec> {
        let sys_file = tempfile::NamedTempFile::new().unwrap();
        let sys_region = Region::open(sys_file.path(), 4 * 1024 * 1024, true, RegionKind::System).unwrap();
        let node_size = node_size_for_record::<Rec>(min_degree);
        let sys = Arc::new(SysAllocator::new(sys_region, node_size, 1024).unwrap());

        let descriptor = Box::leak(Box::new(unsafe {
            std::mem::MaybeUninit::<BtreeDescriptor>::zeroed().assume_init()
        }));
        let sys_dyn: Arc<dyn BtreeAllocator> = sys;
        unsafe { Btree::create(descriptor as *mut BtreeDescriptor, sys_dyn, min_degree) }
    }

    #[test]
    fn insert_then_search_finds_every_key() {
        let tree = make_tree(3);
        for k in 0..200u64 {
            tree.insert(Rec { key: k, value: k * 10 }).unwrap();
        }
        assert_eq!(tree.len(), 200);
        for k in 0..200u64 {
            let rec = tree.search(k).unwrap();
            assert_eq!(rec.value, k * 10);
        }
        assert!(tree.search(200).is_none());
    }

    #[test]
    fn traverse_visits_keys_in_ascending_order() {
        let tree = make_tree(3);
        let keys = [50u64, 10, 90, 30, 70, 20, 80, 40, 60, 0, 100];
        for k in keys {
            tree.insert(Rec { key: k, value: k }).unwrap();
        }
        let mut seen = Vec::new();
        tree.traverse(|rec| seen.push(rec.key));
        let mut expected = keys.to_vec();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn find_returns_smallest_key_at_or_above() {
        let tree = make_tree(3);
        for k in [10u64, 20, 30, 40] {
            tree.insert(Rec { key: k, value: k }).unwrap();
        }
        assert_eq!(tree.find(25).unwrap().key, 30);
        assert_eq!(tree.find(30).unwrap().key, 30);
        assert!(tree.find(41).is_none());
    }

    #[test]
    fn rfind_returns_largest_key_at_or_below() {
        let tree = make_tree(3);
        for k in [10u64, 20, 30, 40] {
            tree.insert(Rec { key: k, value: k }).unwrap();
        }
        assert_eq!(tree.rfind(25).unwrap().key, 20);
        assert_eq!(tree.rfind(30).unwrap().key, 30);
        assert!(tree.rfind(9).is_none());
    }

    #[test]
    fn delete_removes_keys_and_keeps_the_rest_searchable() {
        let tree = make_tree(3);
        for k in 0..100u64 {
            tree.insert(Rec { key: k, value: k }).unwrap();
        }
        for k in (0..100u64).step_by(2) {
            assert!(tree.delete(k).unwrap());
        }
        assert_eq!(tree.len(), 50);
        for k in 0..100u64 {
            if k % 2 == 0 {
                assert!(tree.search(k).is_none());
            } else {
                assert!(tree.search(k).is_some());
            }
        }
        assert!(!tree.delete(0).unwrap());
    }

    #[test]
    fn delete_down_to_empty_leaves_a_valid_root() {
        let tree = make_tree(3);
        for k in 0..30u64 {
            tree.insert(Rec { key: k, value: k }).unwrap();
        }
        for k in 0..30u64 {
            assert!(tree.delete(k).unwrap());
        }
        assert_eq!(tree.len(), 0);
        assert!(tree.is_empty());
        assert!(tree.search(0).is_none());
        // The tree must still accept inserts after being drained.
        tree.insert(Rec { key: 1, value: 1 }).unwrap();
        assert_eq!(tree.search(1).unwrap().value, 1);
    }

    #[test]
    fn cursor_walks_forward_and_backward_in_order() {
        let tree = make_tree(3);
        for k in [5u64, 1, 9, 3, 7] {
            tree.insert(Rec { key: k, value: k }).unwrap();
        }

        let mut cursor = tree.begin();
        let mut forward = Vec::new();
        while !cursor.at_end() {
            forward.push(cursor.data().unwrap().key);
            cursor.next();
        }
        assert_eq!(forward, vec![1, 3, 5, 7, 9]);

        let mut cursor = tree.find_cursor(7);
        assert_eq!(cursor.data().unwrap().key, 7);
        assert_eq!(cursor.previous().unwrap().key, 5);
        assert_eq!(cursor.previous().unwrap().key, 3);

        let mut cursor = tree.rfind_cursor(6);
        assert_eq!(cursor.data().unwrap().key, 5);
        assert_eq!(cursor.next().unwrap().key, 7);
    }
}
