//! `SignalStore`: the per-(domain, key) registry and FIFO operations.

use super::list::{RegistryRecord, SignalDataHeader, SignalList};
use crate::btree::{Btree, BtreeAllocator};
use crate::error::{VsiError, VsiResult};
use crate::offset::Offset;
use crate::user_allocator::UserAllocator;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

pub struct SignalStore {
    user: Arc<UserAllocator>,
    registry: Btree<RegistryRecord>,
}

impl SignalStore {
    /// # Safety
    /// `registry_desc` must point at a descriptor slot reserved for this
    /// tree by the region's layout.
    pub unsafe fn new(
        user: Arc<UserAllocator>,
        registry_desc: *mut crate::btree::BtreeDescriptor,
        min_degree: usize,
        fresh: bool,
    ) -> Self {
        let user_dyn: Arc<dyn BtreeAllocator> = user.clone();
        let registry = if fresh {
            Btree::create(registry_desc, user_dyn, min_degree)
        } else {
            Btree::open(registry_desc, user_dyn)
        };
        SignalStore { user, registry }
    }

    /// Looks up the list for `(domain, key)`, assuming the region lock is
    /// already held by the caller. Never call this without the lock: the
    /// registry `Btree`'s node rewrites during a concurrent `insert`
    /// (`split_child`'s several separate volatile writes to a node's key
    /// and child arrays) are not atomic, so an unlocked search can follow
    /// a torn read into a stale or garbage offset.
    fn list_ptr_locked(&self, domain: u64, key: u64) -> Option<*mut SignalList> {
        self.registry
            .search((domain, key))
            .map(|rec| self.user.region().to_address(rec.list_offset) as *mut SignalList)
    }

    /// Looks up the list for `(domain, key)` under a freshly acquired
    /// region lock. For callers that already hold the lock, use
    /// [`Self::list_ptr_locked`] instead.
    fn list_ptr(&self, domain: u64, key: u64) -> VsiResult<Option<*mut SignalList>> {
        let _guard = self.user.region().header().lock.lock()?;
        Ok(self.list_ptr_locked(domain, key))
    }

    fn find_or_create_list(&self, domain: u64, key: u64) -> VsiResult<*mut SignalList> {
        let region = self.user.region();
        let _guard = region.header().lock.lock()?;
        if let Some(p) = self.list_ptr_locked(domain, key) {
            return Ok(p);
        }
        let list_offset = self.user.alloc(std::mem::size_of::<SignalList>() as u64)?;
        let ptr = region.to_address(list_offset) as *mut SignalList;
        // SAFETY: freshly allocated, exclusively owned storage.
        unsafe {
            (*ptr).domain = domain;
            (*ptr).key = key;
            (*ptr).head.store(Offset::NULL.get(), Relaxed);
            (*ptr).tail.store(Offset::NULL.get(), Relaxed);
            (*ptr).current_signal_count.store(0, Relaxed);
            (*ptr).total_signal_size.store(0, Relaxed);
            (*ptr).semaphore.init_shared()?;
        }
        self.registry.insert(RegistryRecord {
            domain,
            key,
            list_offset,
        })?;
        Ok(ptr)
    }

    /// Appends `body` to the (domain, key) list, creating the list on
    /// first use, and wakes any blocked readers.
    pub fn insert(&self, domain: u64, key: u64, body: &[u8]) -> VsiResult<()> {
        let list_ptr = self.find_or_create_list(domain, key)?;
        let region = self.user.region();
        let guard = region.header().lock.lock()?;
        // SAFETY: `list_ptr` was allocated from the user region and stays
        // live for the region's lifetime.
        let list = unsafe { &*list_ptr };

        let data_offset = self.user.alloc(SignalDataHeader::SIZE + body.len() as u64)?;
        let header_ptr = region.to_address(data_offset) as *mut SignalDataHeader;
        unsafe {
            (*header_ptr).next.store(Offset::NULL.get(), Relaxed);
            (*header_ptr).message_size.store(body.len() as u64, Relaxed);
            let payload_ptr = region.to_address(SignalDataHeader::payload_offset(data_offset));
            std::ptr::copy_nonoverlapping(body.as_ptr(), payload_ptr, body.len());
        }

        let tail = Offset(list.tail.load(Relaxed));
        if tail.is_null() {
            list.head.store(data_offset.get(), Relaxed);
        } else {
            let tail_header = region.to_address(tail) as *const SignalDataHeader;
            unsafe { (*tail_header).next.store(data_offset.get(), Relaxed) };
        }
        list.tail.store(data_offset.get(), Relaxed);
        list.current_signal_count.fetch_add(1, Relaxed);
        list.total_signal_size.fetch_add(body.len() as u64, Relaxed);

        list.semaphore.post()?;
        drop(guard);
        Ok(())
    }

    /// Shared wait/lock-handoff protocol for `fetch`/`fetch_newest`: the
    /// region lock guards list structure, but a blocking wait must release
    /// it first so a producer can make progress — the region lock and a
    /// list's semaphore are distinct blocking points.
    ///
    /// A single `post` broadcasts to every waiter blocked here, not just
    /// one, so this loops rather than trusting the wakeup to mean "the
    /// list is now non-empty for me specifically" — each waiter re-checks
    /// the list head itself after reacquiring the region lock.
    fn wait_for_nonempty<'a>(
        &'a self,
        region: &'a crate::region::Region,
        list: &SignalList,
        wait: bool,
        domain: u64,
        key: u64,
    ) -> VsiResult<Option<crate::locks::ProcessMutexGuard<'a>>> {
        let mut guard = Some(region.header().lock.lock()?);
        loop {
            if !Offset(list.head.load(Relaxed)).is_null() {
                return Ok(guard);
            }
            if !wait {
                return Err(VsiError::NoData { domain, key });
            }
            let since = list.semaphore.generation();
            list.semaphore.inc_waiters();
            drop(guard.take());
            list.semaphore.wait_for_change_since(since)?;
            guard = Some(region.header().lock.lock()?);
            list.semaphore.dec_waiters();
        }
    }

    /// Pops the oldest queued record for (domain, key), optionally
    /// blocking until one arrives. Only the last waiter to leave a
    /// multi-waiter wakeup actually removes the record.
    pub fn fetch(&self, domain: u64, key: u64, max_size: usize, wait: bool) -> VsiResult<Vec<u8>> {
        let region = self.user.region();
        let list_ptr = self
            .list_ptr(domain, key)?
            .ok_or(VsiError::NoData { domain, key })?;
        let list = unsafe { &*list_ptr };

        let guard = self.wait_for_nonempty(region, list, wait, domain, key)?;
        let head_offset = Offset(list.head.load(Relaxed));
        if head_offset.is_null() {
            return Err(VsiError::NoData { domain, key });
        }

        let header_ptr = region.to_address(head_offset) as *const SignalDataHeader;
        let message_size = unsafe { (*header_ptr).message_size.load(Relaxed) } as usize;
        let copy_len = max_size.min(message_size);
        let payload_ptr = region.to_address(SignalDataHeader::payload_offset(head_offset));
        let mut out = vec![0u8; copy_len];
        unsafe { std::ptr::copy_nonoverlapping(payload_ptr, out.as_mut_ptr(), copy_len) };

        if list.semaphore.waiter_count() <= 0 {
            let next = Offset(unsafe { (*header_ptr).next.load(Relaxed) });
            list.head.store(next.get(), Relaxed);
            if next.is_null() {
                list.tail.store(Offset::NULL.get(), Relaxed);
            }
            list.current_signal_count.fetch_sub(1, Relaxed);
            list.total_signal_size.fetch_sub(message_size as u64, Relaxed);
            self.user.free(head_offset)?;
        }

        drop(guard);
        Ok(out)
    }

    /// Reads the newest queued record for (domain, key) without removing
    /// it, using the same wait protocol as `fetch`. Holds the region lock
    /// across the copy, same as `fetch` — records are immutable once
    /// inserted, but `flush` can still free the tail chunk out from under
    /// an unlocked read, so the lock has to cover the copy, not just the
    /// offset read.
    pub fn fetch_newest(
        &self,
        domain: u64,
        key: u64,
        max_size: usize,
        wait: bool,
    ) -> VsiResult<Vec<u8>> {
        let region = self.user.region();
        let list_ptr = self
            .list_ptr(domain, key)?
            .ok_or(VsiError::NoData { domain, key })?;
        let list = unsafe { &*list_ptr };

        let guard = self.wait_for_nonempty(region, list, wait, domain, key)?;
        let tail_offset = Offset(list.tail.load(Relaxed));
        if tail_offset.is_null() {
            return Err(VsiError::NoData { domain, key });
        }

        let header_ptr = region.to_address(tail_offset) as *const SignalDataHeader;
        let message_size = unsafe { (*header_ptr).message_size.load(Relaxed) } as usize;
        let copy_len = max_size.min(message_size);
        let payload_ptr = region.to_address(SignalDataHeader::payload_offset(tail_offset));
        let mut out = vec![0u8; copy_len];
        unsafe { std::ptr::copy_nonoverlapping(payload_ptr, out.as_mut_ptr(), copy_len) };

        drop(guard);
        Ok(out)
    }

    /// Frees every queued record for (domain, key) and wakes any stranded
    /// waiters.
    pub fn flush(&self, domain: u64, key: u64) -> VsiResult<()> {
        let region = self.user.region();
        let list_ptr = match self.list_ptr(domain, key)? {
            Some(p) => p,
            None => return Ok(()),
        };
        let guard = region.header().lock.lock()?;
        let list = unsafe { &*list_ptr };

        let mut cur = Offset(list.head.load(Relaxed));
        while !cur.is_null() {
            let header_ptr = region.to_address(cur) as *const SignalDataHeader;
            let next = Offset(unsafe { (*header_ptr).next.load(Relaxed) });
            self.user.free(cur)?;
            cur = next;
        }
        list.head.store(Offset::NULL.get(), Relaxed);
        list.tail.store(Offset::NULL.get(), Relaxed);
        list.current_signal_count.store(0, Relaxed);
        list.total_signal_size.store(0, Relaxed);

        if list.semaphore.waiter_count() > 0 {
            list.semaphore.wake_all()?;
        }

        drop(guard);
        Ok(())
    }

    pub fn signal_count(&self, domain: u64, key: u64) -> u64 {
        match self.list_ptr(domain, key) {
            Ok(Some(p)) => unsafe { (*p).current_signal_count.load(Relaxed) },
            _ => 0,
        }
    }

    /// Every registered `(domain, key)` pair and its current queue depth,
    /// in registry key order. Backs the `dump` CLI subcommand. Holds the
    /// region lock for the whole traversal, not just each record's
    /// `to_address` conversion, so a concurrent insert's node split can't
    /// be observed mid-rewrite.
    pub fn registry_entries(&self) -> Vec<(u64, u64, u64)> {
        let region = self.user.region();
        let mut out = Vec::new();
        let guard = match region.header().lock.lock() {
            Ok(g) => g,
            Err(_) => return out,
        };
        self.registry.traverse(|rec| {
            let ptr = region.to_address(rec.list_offset) as *mut SignalList;
            let depth = unsafe { (*ptr).current_signal_count.load(Relaxed) };
            out.push((rec.domain, rec.key, depth));
        });
        drop(guard);
        out
    }
}
