//! `SignalList` and `SignalData` layouts.

use crate::locks::BroadcastSemaphore;
use crate::offset::Offset;
use std::sync::atomic::AtomicU64;

/// Per-(domain, key) FIFO control block, allocated from the user region
/// and referenced from the signal registry B-tree by offset.
#[repr(C)]
pub struct SignalList {
    pub domain: u64,
    pub key: u64,
    pub head: AtomicU64,
    pub tail: AtomicU64,
    pub current_signal_count: AtomicU64,
    pub total_signal_size: AtomicU64,
    pub semaphore: BroadcastSemaphore,
}

/// Header prepended to every queued record; payload bytes follow inline.
#[repr(C)]
pub struct SignalDataHeader {
    pub next: AtomicU64,
    pub message_size: AtomicU64,
}

impl SignalDataHeader {
    pub const SIZE: u64 = std::mem::size_of::<SignalDataHeader>() as u64;

    pub fn payload_offset(record_offset: Offset) -> Offset {
        Offset(record_offset.get() + Self::SIZE)
    }
}

/// The signal registry B-tree's record type: identifies a (domain, key)
/// pair and points at its [`SignalList`].
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct RegistryRecord {
    pub domain: u64,
    pub key: u64,
    pub list_offset: Offset,
}

impl crate::btree::BtreeRecord for RegistryRecord {
    type Key = (u64, u64);
    fn key(&self) -> Self::Key {
        (self.domain, self.key)
    }
}
