//! `MemoryChunk`: the header prepended to every user-region allocation.

use crate::offset::Offset;
use bytemuck::{Pod, Zeroable};

pub const IN_USE_MARKER: u32 = 0x5A5A_A5A5;
pub const FREE_MARKER: u32 = 0xF4EE_F4EE;

/// Minimum gap (bytes) a leftover tail must clear before `alloc` bothers
/// splitting it off as a new free chunk.
pub const SPLIT_THRESHOLD: u64 = 16;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum ChunkType {
    User = 0,
    System = 1,
}

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct MemoryChunk {
    pub marker: u32,
    pub chunk_type: u32,
    pub segment_size: u64,
    pub offset: Offset,
}

impl MemoryChunk {
    pub const HEADER_SIZE: u64 = std::mem::size_of::<MemoryChunk>() as u64;

    pub fn round_up_8(n: u64) -> u64 {
        (n + 7) & !7
    }

    pub fn is_in_use(&self) -> bool {
        self.marker == IN_USE_MARKER
    }

    pub fn is_free(&self) -> bool {
        self.marker == FREE_MARKER
    }

    pub fn chunk_type(&self) -> ChunkType {
        match self.chunk_type {
            1 => ChunkType::System,
            _ => ChunkType::User,
        }
    }

    pub fn end_offset(&self) -> Offset {
        Offset(self.offset.get() + self.segment_size)
    }

    pub fn data_offset(&self) -> Offset {
        Offset(self.offset.get() + Self::HEADER_SIZE)
    }
}
