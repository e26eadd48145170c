//! File-backed shared-memory regions (`User` and `System`).
//!
//! Mapped with `memmap2::MmapOptions`; the raw pointer derived from the
//! mapping is wrapped in an explicit `unsafe impl Send`/`Sync` with the
//! access discipline documented at each impl.

use crate::error::{VsiError, VsiResult};
use crate::locks::ProcessMutex;
use crate::offset::Offset;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RegionKind {
    User,
    System,
}

/// Header stored at the base of every region: size, allocation watermark,
/// the late-joiner gate, and the region lock every other lock in the
/// region is ultimately serialized behind.
#[repr(C)]
pub struct RegionHeader {
    magic: AtomicU64,
    pub total_size: AtomicU64,
    pub watermark: AtomicU64,
    system_initialized: AtomicU32,
    pub lock: ProcessMutex,
}

const REGION_MAGIC: u64 = 0x5653_495F_5245_474E; // "VSI_REGN"

/// MADV_HUGEPAGE (14 on Linux).
const MADV_HUGEPAGE: libc::c_int = 14;

/// Best-effort hint that the user region's signal heap should back onto
/// transparent huge pages, reducing TLB pressure for the signal records
/// producers/consumers walk most often. The kernel may ignore it.
fn advise_hugepages(ptr: *mut u8, len: usize) {
    // SAFETY: `ptr`/`len` describe the region's own mapping for its full
    // lifetime; `madvise` is a hint and never invalidates the mapping.
    let ret = unsafe { libc::madvise(ptr as *mut libc::c_void, len, MADV_HUGEPAGE) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        log::warn!("MADV_HUGEPAGE failed for user region: {err}");
    }
}

impl RegionHeader {
    pub fn header_size() -> usize {
        std::mem::size_of::<RegionHeader>()
    }
}

/// A mapped region: the header plus everything after it, reachable only
/// through offsets (see [`crate::offset::Offset`]).
pub struct Region {
    mmap: MmapMut,
    kind: RegionKind,
    fresh: bool,
}

// SAFETY: `mmap` is a `MAP_SHARED` mapping; every mutable access to it goes
// either through atomics in `RegionHeader` or through process-shared
// mutexes guarding the remainder.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    pub fn open(path: &Path, size: u64, create_new: bool, kind: RegionKind) -> VsiResult<Self> {
        if create_new {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(size)?;

        // SAFETY: `file` is sized to at least `size` bytes and outlives the
        // mapping (dropped with it, per `memmap2`'s contract).
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let fresh = !existed || mmap.len() < RegionHeader::header_size();
        let header_ptr = mmap.as_mut_ptr() as *mut RegionHeader;

        if fresh {
            // SAFETY: `header_ptr` is valid for `RegionHeader`'s layout and
            // the bytes are not yet observed by any other process.
            unsafe {
                let header = &mut *header_ptr;
                header.magic.store(REGION_MAGIC, Ordering::Relaxed);
                header.total_size.store(size, Ordering::Relaxed);
                header
                    .watermark
                    .store(RegionHeader::header_size() as u64, Ordering::Relaxed);
                header.system_initialized.store(0, Ordering::Release);
                header.lock.init_shared()?;
                header.system_initialized.store(1, Ordering::Release);
            }
        } else {
            // SAFETY: an existing, previously-initialized region; wait for
            // the creator to finish stamping the header if we raced it.
            let header = unsafe { &*header_ptr };
            let mut spins = 0;
            while header.system_initialized.load(Ordering::Acquire) == 0 {
                std::thread::yield_now();
                spins += 1;
                if spins > 1_000_000 {
                    return Err(VsiError::IoError(
                        "timed out waiting for region initialization".into(),
                    ));
                }
            }
        }

        let region = Region { mmap, kind, fresh };
        if region.kind == RegionKind::User {
            advise_hugepages(region.base_ptr(), region.mmap.len());
        }
        Ok(region)
    }

    /// True if this call to `open` performed first-time initialization —
    /// callers use this to decide whether to create or attach to the
    /// B-trees/allocators living in this region.
    pub fn was_fresh(&self) -> bool {
        self.fresh
    }

    pub fn header(&self) -> &RegionHeader {
        // SAFETY: the header occupies the first `size_of::<RegionHeader>()`
        // bytes of every region, established by `open`.
        unsafe { &*(self.mmap.as_ptr() as *const RegionHeader) }
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Flushes the mapping to its backing file. The mapping itself is
    /// unmapped when the last reference to this `Region` drops; `close`
    /// makes the flush explicit and observable instead of leaving it to
    /// `Drop`, where an I/O failure would otherwise be silently swallowed.
    pub fn close(&self) -> VsiResult<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Converts a raw address within this region's mapping into a
    /// cross-process-stable offset.
    pub fn to_offset(&self, ptr: *const u8) -> Offset {
        let base = self.mmap.as_ptr() as usize;
        let addr = ptr as usize;
        debug_assert!(addr >= base && addr <= base + self.mmap.len());
        Offset((addr - base) as u64)
    }

    /// Converts an offset back into a local address valid only in this
    /// process. Never persist or send the result across a process boundary.
    pub fn to_address(&self, offset: Offset) -> *mut u8 {
        debug_assert!(!offset.is_null());
        unsafe { self.base_ptr().add(offset.get() as usize) }
    }

    pub fn size(&self) -> u64 {
        self.header().total_size.load(Ordering::Relaxed)
    }

    /// Bumps the watermark by `len` (rounded by the caller to 8 bytes) and
    /// returns the offset the new span starts at. Used only by the
    /// allocators' initial carve-up of a freshly created region.
    pub fn bump_watermark(&self, len: u64) -> VsiResult<Offset> {
        let header = self.header();
        let start = header.watermark.load(Ordering::Relaxed);
        let end = start
            .checked_add(len)
            .ok_or_else(|| VsiError::OutOfMemory("watermark overflow".into()))?;
        if end > header.total_size.load(Ordering::Relaxed) {
            return Err(VsiError::OutOfMemory(format!(
                "region exhausted: need {len} more bytes, only {} left",
                header.total_size.load(Ordering::Relaxed) - start
            )));
        }
        header.watermark.store(end, Ordering::Relaxed);
        Ok(Offset(start))
    }
}
