//! `VsiStore`: the top-level handle composing both regions, both
//! allocators, and the signal store.

use crate::btree::BtreeDescriptor;
use crate::config::StoreConfig;
use crate::error::VsiResult;
use crate::region::{Region, RegionHeader, RegionKind};
use crate::signal::SignalStore;
use crate::sys_allocator::SysAllocator;
use crate::user_allocator::{BySizeRecord, UserAllocator};
use std::sync::Arc;

/// Fixed layout of the user region's header area: three B-tree descriptors
/// (free-by-size, free-by-offset, signal registry) back to back, followed
/// by the allocatable heap.
struct UserLayout {
    by_size_desc: crate::offset::Offset,
    by_offset_desc: crate::offset::Offset,
    registry_desc: crate::offset::Offset,
    heap_start: u64,
}

fn user_layout() -> UserLayout {
    let header_size = RegionHeader::header_size() as u64;
    let desc_size = BtreeDescriptor::size() as u64;
    UserLayout {
        by_size_desc: crate::offset::Offset(header_size),
        by_offset_desc: crate::offset::Offset(header_size + desc_size),
        registry_desc: crate::offset::Offset(header_size + 2 * desc_size),
        heap_start: header_size + 3 * desc_size,
    }
}

/// Attaches to (or creates) the shared-memory signal store described by a
/// [`StoreConfig`]. Cheap to clone via `Arc` internally where needed; a
/// single process typically opens one and shares it across threads.
pub struct VsiStore {
    signals: SignalStore,
    #[allow(dead_code)]
    user: Arc<UserAllocator>,
    #[allow(dead_code)]
    sys: Arc<SysAllocator>,
}

impl VsiStore {
    /// Opens the store named by `config`, creating both regions and their
    /// allocators/B-trees if this is the first process to attach. When
    /// `create_new` is true, both region files are unlinked and recreated
    /// fresh before mapping, discarding whatever they held. An `IoError`
    /// here is fatal for the calling process: the region layout cannot be
    /// trusted and there is no safe degraded mode.
    pub fn open(config: &StoreConfig, create_new: bool) -> VsiResult<Self> {
        match Self::open_inner(config, create_new) {
            Ok(store) => Ok(store),
            Err(e) => {
                log::error!("failed to open vsi store: {e}");
                Err(e)
            }
        }
    }

    fn open_inner(config: &StoreConfig, create_new: bool) -> VsiResult<Self> {
        let sys_region = Region::open(
            &config.sys_region_path,
            config.sys_region_size,
            create_new,
            RegionKind::System,
        )?;
        let fresh = sys_region.was_fresh();
        let sys_node_size = crate::btree::node_size_for_record::<BySizeRecord>(config.btree_min_degree);
        let sys = Arc::new(SysAllocator::new(
            sys_region,
            sys_node_size,
            config.sys_node_count as u64,
        )?);

        let user_region = Region::open(
            &config.user_region_path,
            config.user_region_size,
            create_new,
            RegionKind::User,
        )?;
        let layout = user_layout();

        let user = Arc::new(UserAllocator::new(
            user_region,
            sys.clone(),
            layout.by_size_desc,
            layout.by_offset_desc,
            config.btree_min_degree,
            fresh,
            layout.heap_start,
        )?);

        let registry_ptr =
            user.region().to_address(layout.registry_desc) as *mut BtreeDescriptor;
        // SAFETY: `registry_desc` is reserved exclusively for the signal
        // registry by `user_layout`, consistent across every process that
        // opens this region.
        let signals = unsafe {
            SignalStore::new(user.clone(), registry_ptr, config.btree_min_degree, fresh)
        };

        log::info!(
            "vsi store opened: user={:?} ({} bytes), sys={:?} ({} bytes), fresh={fresh}",
            config.user_region_path,
            config.user_region_size,
            config.sys_region_path,
            config.sys_region_size,
        );

        Ok(VsiStore { signals, user, sys })
    }

    /// Inserts `body` as the newest signal for `(domain, key)`.
    pub fn insert(&self, domain: u64, key: u64, body: &[u8]) -> VsiResult<()> {
        self.signals.insert(domain, key, body)
    }

    /// Pops the oldest queued signal for `(domain, key)`, optionally
    /// blocking until one is available.
    pub fn fetch(&self, domain: u64, key: u64, max_size: usize, wait: bool) -> VsiResult<Vec<u8>> {
        self.signals.fetch(domain, key, max_size, wait)
    }

    /// Reads the newest signal for `(domain, key)` without removing it.
    pub fn fetch_newest(
        &self,
        domain: u64,
        key: u64,
        max_size: usize,
        wait: bool,
    ) -> VsiResult<Vec<u8>> {
        self.signals.fetch_newest(domain, key, max_size, wait)
    }

    /// Discards every queued signal for `(domain, key)` and wakes any
    /// stranded waiters.
    pub fn flush(&self, domain: u64, key: u64) -> VsiResult<()> {
        self.signals.flush(domain, key)
    }

    pub fn signal_count(&self, domain: u64, key: u64) -> u64 {
        self.signals.signal_count(domain, key)
    }

    /// Every registered `(domain, key)` pair and its current queue depth.
    pub fn registry_entries(&self) -> Vec<(u64, u64, u64)> {
        self.signals.registry_entries()
    }

    /// Flushes both regions to their backing files and consumes the
    /// handle. The mappings themselves are released when the last `Arc`
    /// to each allocator drops, which happens here unless the caller kept
    /// its own clone of one around.
    pub fn close(self) -> VsiResult<()> {
        self.user.region().close()?;
        self.sys.region().close()?;
        log::info!("vsi store closed");
        Ok(())
    }
}
