//! Fixed-size block persistence.
//!
//! The unit of persistence is a 4 KiB [`Block`] named by a 64-bit
//! [`LogicalAddr`]. The address packs a per-volume generation tag in the
//! high half and a slot index in the low half; recycling a volume bumps its
//! generation, so stale addresses fail instead of aliasing fresh data.
//!
//! Two [`BlockStore`] implementations ship with the crate: the durable
//! multi-volume [`FileStorage`] and the in-memory [`MemStore`] test double.
//! [`BlockCache`] sits in front of either, keyed by logical address.

pub mod cache;
pub mod file;
pub mod mem;
pub mod volume;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

pub use cache::{BlockCache, CacheProbe};
pub use file::FileStorage;
pub use mem::{MemStore, MEMSTORE_BASE};
pub use volume::{MetaVolume, Volume};

/// Size of a block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Logical address of a block: `(generation << 32) | slot`.
pub type LogicalAddr = u64;

/// Sentinel address of a block that has not been appended yet.
pub const EMPTY_ADDR: LogicalAddr = LogicalAddr::MAX;

/// Composes a logical address from a generation tag and a slot index.
pub fn make_addr(generation: u32, slot: u32) -> LogicalAddr {
    (generation as u64) << 32 | slot as u64
}

/// Extracts the generation tag from a logical address.
pub fn addr_generation(addr: LogicalAddr) -> u32 {
    (addr >> 32) as u32
}

/// Extracts the slot index from a logical address.
pub fn addr_slot(addr: LogicalAddr) -> u32 {
    addr as u32
}

/// A fixed-size page of data tagged with its logical address.
///
/// A freshly constructed block carries [`EMPTY_ADDR`]; the store assigns
/// the real address during `append_block`.
#[derive(Debug, Clone)]
pub struct Block {
    data: Vec<u8>,
    addr: LogicalAddr,
}

impl Block {
    /// Creates a zeroed, unassigned block.
    pub fn new() -> Self {
        Self {
            data: vec![0u8; BLOCK_SIZE],
            addr: EMPTY_ADDR,
        }
    }

    /// Creates a block from an address and exactly [`BLOCK_SIZE`] bytes.
    pub fn from_parts(addr: LogicalAddr, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), BLOCK_SIZE);
        Self { data, addr }
    }

    /// Read access to the page contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Write access to the page contents.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The block's logical address, or [`EMPTY_ADDR`] if unassigned.
    pub fn addr(&self) -> LogicalAddr {
        self.addr
    }

    /// Assigns the block's logical address.
    pub fn set_addr(&mut self, addr: LogicalAddr) {
        self.addr = addr;
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated occupancy counters of a store or a single volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStoreStats {
    /// Size of one block in bytes.
    pub block_size: u32,
    /// Total capacity in blocks.
    pub capacity: u64,
    /// Number of written blocks.
    pub nblocks: u64,
}

/// Per-volume stats keyed by volume name.
pub type PerVolumeStats = BTreeMap<String, BlockStoreStats>;

/// Append-only block storage addressed by [`LogicalAddr`].
///
/// All mutation goes through `append_block`; random-access writes are not
/// part of the interface.
pub trait BlockStore: Send + Sync {
    /// Reads the block at `addr`.
    ///
    /// Either returns the exact bytes previously appended under `addr` or
    /// fails with a not-found class error - never a different block.
    fn read_block(&self, addr: LogicalAddr) -> Result<Arc<Block>>;

    /// Appends `block` and assigns its logical address.
    fn append_block(&self, block: &mut Block) -> Result<LogicalAddr>;

    /// Returns true if `addr` currently names a readable block.
    fn exists(&self, addr: LogicalAddr) -> bool;

    /// Flushes buffered writes to durable storage.
    fn flush(&self) -> Result<()>;

    /// Aggregated occupancy counters for the whole store.
    fn stats(&self) -> BlockStoreStats;

    /// Occupancy counters per volume.
    fn volume_stats(&self) -> PerVolumeStats;

    /// CRC32-C checksum over `data`.
    fn checksum(&self, data: &[u8]) -> u32 {
        checksum(data)
    }
}

/// CRC32-C (Castagnoli) checksum over arbitrary bytes.
///
/// Callable independently of any block store; hardware acceleration is
/// selected internally by the `crc32c` crate.
pub fn checksum(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}
