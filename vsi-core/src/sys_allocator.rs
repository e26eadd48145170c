//! Fixed-size node allocator over the system region.
//!
//! Blocks are threaded into a singly linked free list using the block's
//! own first 8 bytes as the next-offset, the classic free-list-slab idiom
//! of storing the link inside the freed slot itself.

use crate::btree::BtreeAllocator;
use crate::error::{VsiError, VsiResult};
use crate::offset::Offset;
use crate::region::{Region, RegionHeader};
use std::sync::atomic::{AtomicU64, Ordering};

/// Header for the system region's free list, placed immediately after
/// [`RegionHeader`].
#[repr(C)]
pub struct SysAllocatorHeader {
    free_head: AtomicU64,
    free_count: AtomicU64,
    node_size: AtomicU64,
    node_count: AtomicU64,
}

impl SysAllocatorHeader {
    pub fn size() -> usize {
        std::mem::size_of::<SysAllocatorHeader>()
    }
}

/// O(1) pop/push allocator serving only the two free-memory B-trees of
/// [`crate::user_allocator::UserAllocator`].
pub struct SysAllocator {
    region: Region,
}

impl SysAllocator {
    const HEADER_OFFSET: u64 = RegionHeader::header_size() as u64;

    fn pool_start() -> u64 {
        Self::HEADER_OFFSET + SysAllocatorHeader::size() as u64
    }

    fn header(&self) -> &SysAllocatorHeader {
        // SAFETY: `Self::HEADER_OFFSET` is reserved for this header by
        // every call path that creates a system region.
        unsafe { &*(self.region.to_address(Offset(Self::HEADER_OFFSET)) as *const SysAllocatorHeader) }
    }

    /// Wraps an already-open system region, laying out the free list on
    /// first use (when `node_size`/`node_count` in the header read zero).
    pub fn new(region: Region, node_size: u64, node_count: u64) -> VsiResult<Self> {
        let node_size = crate::chunk::MemoryChunk::round_up_8(node_size.max(8));
        let alloc = SysAllocator { region };
        let needed = Self::pool_start() + node_size * node_count;
        if needed > alloc.region.size() {
            return Err(VsiError::IoError(format!(
                "system region too small: need {needed} bytes, have {}",
                alloc.region.size()
            )));
        }

        let guard = alloc.region.header().lock.lock()?;
        let header = alloc.header();
        if header.node_count.load(Ordering::Relaxed) == 0 {
            header.node_size.store(node_size, Ordering::Relaxed);
            header.node_count.store(node_count, Ordering::Relaxed);
            header.free_count.store(node_count, Ordering::Relaxed);

            let mut prev: Option<u64> = None;
            let mut first = Offset::NULL;
            for i in 0..node_count {
                let block_off = Self::pool_start() + i * node_size;
                if first.is_null() {
                    first = Offset(block_off);
                }
                if let Some(prev_off) = prev {
                    let ptr = alloc.region.to_address(Offset(prev_off)) as *mut u64;
                    // SAFETY: `ptr` points at a node-sized block wholly
                    // within the region, writable under the region lock.
                    unsafe { std::ptr::write_volatile(ptr, block_off) };
                }
                prev = Some(block_off);
            }
            if let Some(last) = prev {
                let ptr = alloc.region.to_address(Offset(last)) as *mut u64;
                unsafe { std::ptr::write_volatile(ptr, Offset::NULL.get()) };
            }
            header.free_head.store(first.get(), Ordering::Relaxed);
        }
        drop(guard);
        Ok(alloc)
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn node_size(&self) -> u64 {
        self.header().node_size.load(Ordering::Relaxed)
    }

    /// Pops a block off the free list. O(1). Exhaustion surfaces as
    /// [`VsiError::OutOfMemory`] rather than a distinct error variant.
    pub fn alloc_sys(&self) -> VsiResult<Offset> {
        let _guard = self.region.header().lock.lock()?;
        let header = self.header();
        let head = header.free_head.load(Ordering::Relaxed);
        if head == Offset::NULL.get() {
            return Err(VsiError::OutOfMemory("system region has no free nodes".into()));
        }
        let ptr = self.region.to_address(Offset(head)) as *const u64;
        // SAFETY: `head` was linked in by `new` or a prior `free_sys` and
        // refers to a live node-sized block.
        let next = unsafe { std::ptr::read_volatile(ptr) };
        header.free_head.store(next, Ordering::Relaxed);
        header.free_count.fetch_sub(1, Ordering::Relaxed);
        Ok(Offset(head))
    }

    /// Pushes a block back onto the free list. O(1).
    pub fn free_sys(&self, block: Offset) -> VsiResult<()> {
        let _guard = self.region.header().lock.lock()?;
        let header = self.header();
        let head = header.free_head.load(Ordering::Relaxed);
        let ptr = self.region.to_address(block) as *mut u64;
        // SAFETY: `block` was previously handed out by `alloc_sys` and is
        // node-sized.
        unsafe { std::ptr::write_volatile(ptr, head) };
        header.free_head.store(block.get(), Ordering::Relaxed);
        header.free_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn free_count(&self) -> u64 {
        self.header().free_count.load(Ordering::Relaxed)
    }
}

impl BtreeAllocator for SysAllocator {
    /// `size` is ignored: every node comes from the same fixed-size pool.
    fn alloc_node(&self, _size: u64) -> VsiResult<Offset> {
        self.alloc_sys()
    }

    fn free_node(&self, offset: Offset, _size: u64) -> VsiResult<()> {
        self.free_sys(offset)
    }

    fn region(&self) -> &Region {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionKind;

    fn temp_region(size: u64) -> Region {
        let file = tempfile::NamedTempFile::new().unwrap();
        Region::open(file.path(), size, true, RegionKind::System).unwrap()
    }

    #[test]
    fn alloc_then_free_round_trips() {
        let region = temp_region(64 * 1024);
        let alloc = SysAllocator::new(region, 256, 16).unwrap();
        assert_eq!(alloc.free_count(), 16);

        let a = alloc.alloc_sys().unwrap();
        let b = alloc.alloc_sys().unwrap();
        assert_ne!(a.get(), b.get());
        assert_eq!(alloc.free_count(), 14);

        alloc.free_sys(a).unwrap();
        alloc.free_sys(b).unwrap();
        assert_eq!(alloc.free_count(), 16);
    }

    #[test]
    fn exhaustion_returns_out_of_memory() {
        let region = temp_region(64 * 1024);
        let alloc = SysAllocator::new(region, 64, 2).unwrap();
        alloc.alloc_sys().unwrap();
        alloc.alloc_sys().unwrap();
        assert!(matches!(alloc.alloc_sys(), Err(VsiError::OutOfMemory(_))));
    }
}
