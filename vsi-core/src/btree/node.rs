//! In-place B-tree node layout: a fixed header followed by a record array
//! and a child-offset array, all in a single contiguous block.

use crate::offset::Offset;
use std::marker::PhantomData;
use std::mem::size_of;

/// Fixed per-node header: parent offset, a next-offset used only for
/// debug/dump traversal linkage, key count, and level (0 at leaves).
#[repr(C)]
struct NodeHeader {
    parent: u64,
    next: u64,
    num_keys: u32,
    level: u32,
}

const HEADER_SIZE: usize = size_of::<NodeHeader>();

/// Computes the total, 8-byte-rounded size of a node holding up to `max`
/// records of size `record_size`.
pub fn node_size_for(max: usize, record_size: usize) -> u64 {
    let raw = HEADER_SIZE + max * record_size + (max + 1) * size_of::<u64>();
    crate::chunk::MemoryChunk::round_up_8(raw as u64)
}

/// A process-local view over one node's bytes. `max` and `record_size` are
/// carried alongside the raw pointer since the layout is determined by the
/// owning tree's minimum degree, not by the Rust type of `R`.
pub struct NodeView<R> {
    ptr: *mut u8,
    max: usize,
    record_size: usize,
    _marker: PhantomData<R>,
}

impl<R: Copy> NodeView<R> {
    /// # Safety
    /// `ptr` must point at a node of at least `node_size_for(max, record_size)`
    /// bytes, valid for the duration of this view's use.
    pub unsafe fn new(ptr: *mut u8, max: usize, record_size: usize) -> Self {
        NodeView {
            ptr,
            max,
            record_size,
            _marker: PhantomData,
        }
    }

    fn header(&self) -> *mut NodeHeader {
        self.ptr as *mut NodeHeader
    }

    fn keys_base(&self) -> *mut u8 {
        unsafe { self.ptr.add(HEADER_SIZE) }
    }

    fn children_base(&self) -> *mut u64 {
        unsafe { self.keys_base().add(self.max * self.record_size) as *mut u64 }
    }

    pub fn num_keys(&self) -> usize {
        unsafe { std::ptr::read_volatile(&(*self.header()).num_keys) as usize }
    }

    pub fn set_num_keys(&self, n: usize) {
        unsafe { std::ptr::write_volatile(&mut (*self.header()).num_keys, n as u32) };
    }

    pub fn level(&self) -> u32 {
        unsafe { std::ptr::read_volatile(&(*self.header()).level) }
    }

    pub fn set_level(&self, level: u32) {
        unsafe { std::ptr::write_volatile(&mut (*self.header()).level, level) };
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    pub fn parent(&self) -> Offset {
        Offset(unsafe { std::ptr::read_volatile(&(*self.header()).parent) })
    }

    pub fn set_parent(&self, offset: Offset) {
        unsafe { std::ptr::write_volatile(&mut (*self.header()).parent, offset.get()) };
    }

    pub fn next(&self) -> Offset {
        Offset(unsafe { std::ptr::read_volatile(&(*self.header()).next) })
    }

    pub fn set_next(&self, offset: Offset) {
        unsafe { std::ptr::write_volatile(&mut (*self.header()).next, offset.get()) };
    }

    pub fn key(&self, i: usize) -> R {
        debug_assert!(i < self.max);
        let ptr = unsafe { self.keys_base().add(i * self.record_size) as *const R };
        unsafe { ptr.read_unaligned() }
    }

    pub fn set_key(&self, i: usize, value: R) {
        debug_assert!(i < self.max);
        let ptr = unsafe { self.keys_base().add(i * self.record_size) as *mut R };
        unsafe { ptr.write_unaligned(value) };
    }

    pub fn child(&self, i: usize) -> Offset {
        debug_assert!(i <= self.max);
        Offset(unsafe { std::ptr::read_volatile(self.children_base().add(i)) })
    }

    pub fn set_child(&self, i: usize, value: Offset) {
        debug_assert!(i <= self.max);
        unsafe { std::ptr::write_volatile(self.children_base().add(i), value.get()) };
    }

    /// Shifts keys `[from, num_keys)` one slot to the right, making room
    /// for an insertion at `from`.
    pub fn shift_keys_right(&self, from: usize, num_keys: usize) {
        for i in (from..num_keys).rev() {
            self.set_key(i + 1, self.key(i));
        }
    }

    /// Shifts keys `[from+1, num_keys)` one slot to the left, closing the
    /// gap left by removing the key at `from`.
    pub fn shift_keys_left(&self, from: usize, num_keys: usize) {
        for i in from..num_keys - 1 {
            self.set_key(i, self.key(i + 1));
        }
    }

    pub fn shift_children_right(&self, from: usize, num_children: usize) {
        for i in (from..num_children).rev() {
            self.set_child(i + 1, self.child(i));
        }
    }

    pub fn shift_children_left(&self, from: usize, num_children: usize) {
        for i in from..num_children - 1 {
            self.set_child(i, self.child(i + 1));
        }
    }
}
