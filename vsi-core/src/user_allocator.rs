//! Best-fit, eager-coalescing allocator over the user region, backed by
//! two free-chunk B-trees that always agree on their contents.

use crate::btree::{Btree, BtreeAllocator, BtreeRecord};
use crate::chunk::{ChunkType, MemoryChunk, FREE_MARKER, IN_USE_MARKER, SPLIT_THRESHOLD};
use crate::error::{VsiError, VsiResult};
use crate::offset::Offset;
use crate::region::Region;
use crate::sys_allocator::SysAllocator;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// A free-chunk record ordered by `(segmentSize, offset)` — the primary
/// index `alloc` searches for a best-fit candidate.
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct BySizeRecord {
    pub segment_size: u64,
    pub offset: Offset,
}

impl BtreeRecord for BySizeRecord {
    type Key = (u64, u64);
    fn key(&self) -> Self::Key {
        (self.segment_size, self.offset.get())
    }
}

/// The same free chunks, ordered by `offset` — used by `free` to locate
/// the adjacent previous chunk for coalescing.
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct ByOffsetRecord {
    pub segment_size: u64,
    pub offset: Offset,
}

impl BtreeRecord for ByOffsetRecord {
    type Key = u64;
    fn key(&self) -> Self::Key {
        self.offset.get()
    }
}

pub struct UserAllocator {
    region: Region,
    by_size: Btree<BySizeRecord>,
    by_offset: Btree<ByOffsetRecord>,
}

impl BtreeAllocator for UserAllocator {
    fn alloc_node(&self, size: u64) -> VsiResult<Offset> {
        self.alloc(size)
    }

    fn free_node(&self, offset: Offset, _size: u64) -> VsiResult<()> {
        self.free(offset)
    }

    fn region(&self) -> &Region {
        &self.region
    }
}

impl UserAllocator {
    /// `by_size_desc`/`by_offset_desc` are fixed offsets into the user
    /// region's header area, reserved by [`crate::store::VsiStore`]'s
    /// layout. `heap_start` is where the allocatable byte range begins
    /// (immediately after all fixed, in-place descriptors).
    pub fn new(
        region: Region,
        sys: Arc<SysAllocator>,
        by_size_desc: Offset,
        by_offset_desc: Offset,
        min_degree: usize,
        fresh: bool,
        heap_start: u64,
    ) -> VsiResult<Self> {
        let by_size_ptr = region.to_address(by_size_desc) as *mut crate::btree::BtreeDescriptor;
        let by_offset_ptr = region.to_address(by_offset_desc) as *mut crate::btree::BtreeDescriptor;

        let sys_dyn: Arc<dyn BtreeAllocator> = sys;
        let (by_size, by_offset) = if fresh {
            // SAFETY: these descriptor slots are reserved exclusively for
            // these two trees by the region layout and not yet observed
            // by any other process.
            unsafe {
                (
                    Btree::create(by_size_ptr, sys_dyn.clone(), min_degree),
                    Btree::create(by_offset_ptr, sys_dyn, min_degree),
                )
            }
        } else {
            unsafe {
                (
                    Btree::open(by_size_ptr, sys_dyn.clone()),
                    Btree::open(by_offset_ptr, sys_dyn),
                )
            }
        };

        let allocator = UserAllocator {
            region,
            by_size,
            by_offset,
        };

        if fresh {
            let total = allocator.region.size();
            if heap_start >= total {
                return Err(VsiError::IoError("user region too small for any heap".into()));
            }
            let size = total - heap_start;
            let chunk = MemoryChunk {
                marker: FREE_MARKER,
                chunk_type: ChunkType::User as u32,
                segment_size: size,
                offset: Offset(heap_start),
            };
            allocator.write_chunk(Offset(heap_start), chunk);
            allocator.by_size.insert(BySizeRecord {
                segment_size: size,
                offset: Offset(heap_start),
            })?;
            allocator.by_offset.insert(ByOffsetRecord {
                segment_size: size,
                offset: Offset(heap_start),
            })?;
        }

        Ok(allocator)
    }

    fn chunk_ptr(&self, offset: Offset) -> *mut MemoryChunk {
        self.region.to_address(offset) as *mut MemoryChunk
    }

    fn read_chunk(&self, offset: Offset) -> MemoryChunk {
        // SAFETY: `offset` always refers to a live chunk header written by
        // `new` or a prior `alloc`/`free`.
        unsafe { std::ptr::read_volatile(self.chunk_ptr(offset)) }
    }

    fn write_chunk(&self, offset: Offset, chunk: MemoryChunk) {
        unsafe { std::ptr::write_volatile(self.chunk_ptr(offset), chunk) };
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Allocates at least `n` bytes, returning the offset of the usable
    /// data area (past the chunk header): find the smallest free chunk
    /// that fits, split off a remainder chunk if one large enough to be
    /// worth keeping would be left over, mark the rest in use.
    pub fn alloc(&self, n: u64) -> VsiResult<Offset> {
        let needed = MemoryChunk::round_up_8(n + MemoryChunk::HEADER_SIZE);
        let _guard = self.region.header().lock.lock()?;

        let found = self
            .by_size
            .find((needed, 0))
            .ok_or_else(|| VsiError::OutOfMemory(format!("no free chunk >= {needed} bytes")))?;

        self.by_size.delete(found.key())?;
        self.by_offset.delete(found.offset.get())?;

        let mut chunk = self.read_chunk(found.offset);
        if chunk.segment_size - needed > SPLIT_THRESHOLD {
            let tail_offset = Offset(chunk.offset.get() + needed);
            let tail_size = chunk.segment_size - needed;
            let tail = MemoryChunk {
                marker: FREE_MARKER,
                chunk_type: ChunkType::User as u32,
                segment_size: tail_size,
                offset: tail_offset,
            };
            self.write_chunk(tail_offset, tail);
            self.by_size.insert(BySizeRecord {
                segment_size: tail_size,
                offset: tail_offset,
            })?;
            self.by_offset.insert(ByOffsetRecord {
                segment_size: tail_size,
                offset: tail_offset,
            })?;
            chunk.segment_size = needed;
        }
        chunk.marker = IN_USE_MARKER;
        self.write_chunk(chunk.offset, chunk);
        Ok(chunk.data_offset())
    }

    /// Frees a previously allocated data pointer, coalescing with the next
    /// and previous free chunks, including the double-free/corruption
    /// distinction on a marker that isn't `IN_USE`.
    pub fn free(&self, data_offset: Offset) -> VsiResult<()> {
        let header_offset = data_offset
            .get()
            .checked_sub(MemoryChunk::HEADER_SIZE)
            .map(Offset)
            .ok_or_else(|| VsiError::InvalidArgument("offset below chunk header size".into()))?;

        let _guard = self.region.header().lock.lock()?;
        let mut chunk = self.read_chunk(header_offset);

        if chunk.is_free() {
            return Err(VsiError::Corruption("double free".into()));
        }
        if !chunk.is_in_use() {
            return Err(VsiError::Corruption(format!(
                "chunk marker mismatch at offset {:?}: {:#x}",
                chunk.offset, chunk.marker
            )));
        }

        let next_offset = chunk.end_offset();
        if next_offset.get() < self.region.size() {
            let next = self.read_chunk(next_offset);
            if next.is_free() {
                self.by_size
                    .delete((next.segment_size, next.offset.get()))?;
                self.by_offset.delete(next.offset.get())?;
                chunk.segment_size += next.segment_size;
            }
        }

        if let Some(probe) = chunk.offset.get().checked_sub(1) {
            if let Some(prev) = self.by_offset.rfind(probe) {
                let prev_chunk = self.read_chunk(prev.offset);
                if prev_chunk.end_offset().get() == chunk.offset.get() {
                    self.by_size
                        .delete((prev_chunk.segment_size, prev_chunk.offset.get()))?;
                    self.by_offset.delete(prev_chunk.offset.get())?;
                    chunk.segment_size += prev_chunk.segment_size;
                    chunk.offset = prev_chunk.offset;
                }
            }
        }

        chunk.marker = FREE_MARKER;
        self.write_chunk(chunk.offset, chunk);
        self.by_size.insert(BySizeRecord {
            segment_size: chunk.segment_size,
            offset: chunk.offset,
        })?;
        self.by_offset.insert(ByOffsetRecord {
            segment_size: chunk.segment_size,
            offset: chunk.offset,
        })?;
        Ok(())
    }

    /// Total bytes held across all free chunks — used by tests to assert
    /// the "fully coalesced back into one chunk" invariant.
    pub fn total_free_bytes(&self) -> u64 {
        let mut total = 0u64;
        self.by_offset.traverse(|rec| total += rec.segment_size);
        total
    }

    pub fn free_chunk_count(&self) -> u64 {
        self.by_offset.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionKind;

    fn make_allocator(user_size: u64, sys_size: u64) -> UserAllocator {
        let user_file = tempfile::NamedTempFile::new().unwrap();
        let sys_file = tempfile::NamedTempFile::new().unwrap();
        let user_region = Region::open(user_file.path(), user_size, true, RegionKind::User).unwrap();
        let sys_region = Region::open(sys_file.path(), sys_size, true, RegionKind::System).unwrap();

        let node_size = crate::btree::node_size_for_record::<BySizeRecord>(16);
        let sys = Arc::new(SysAllocator::new(sys_region, node_size, 256).unwrap());

        let header_size = crate::region::RegionHeader::header_size() as u64;
        let desc_size = crate::btree::BtreeDescriptor::size() as u64;
        let by_size_desc = Offset(header_size);
        let by_offset_desc = Offset(header_size + desc_size);
        let heap_start = header_size + 2 * desc_size;

        UserAllocator::new(user_region, sys, by_size_desc, by_offset_desc, 16, true, heap_start)
            .unwrap()
    }

    #[test]
    fn alloc_free_round_trip_fully_coalesces() {
        let alloc = make_allocator(256 * 1024, 256 * 1024);
        let initial_free = alloc.total_free_bytes();
        assert_eq!(alloc.free_chunk_count(), 1);

        let sizes = [10u64, 20, 30, 40, 50];
        let mut ptrs = Vec::new();
        for s in sizes {
            ptrs.push(alloc.alloc(s).unwrap());
        }
        assert_eq!(alloc.free_chunk_count(), 1);

        // Free out of order: 10, 50, 20, 40, 30.
        let order = [0usize, 4, 1, 3, 2];
        for idx in order {
            alloc.free(ptrs[idx]).unwrap();
        }

        assert_eq!(alloc.free_chunk_count(), 1);
        assert_eq!(alloc.total_free_bytes(), initial_free);
    }

    #[test]
    fn double_free_is_reported_as_corruption() {
        let alloc = make_allocator(64 * 1024, 64 * 1024);
        let p = alloc.alloc(16).unwrap();
        alloc.free(p).unwrap();
        assert!(matches!(alloc.free(p), Err(VsiError::Corruption(_))));
    }

    #[test]
    fn out_of_memory_when_no_chunk_fits() {
        let alloc = make_allocator(4096, 64 * 1024);
        assert!(matches!(alloc.alloc(1_000_000), Err(VsiError::OutOfMemory(_))));
    }
}
