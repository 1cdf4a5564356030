//! In-memory block store used as a test double.
//!
//! Addresses are plain write positions offset by [`MEMSTORE_BASE`]; there
//! are no volumes and no generations. The nonzero base exists so that tests
//! which quietly assume zero-based addressing fail loudly instead of
//! passing by accident.

use std::sync::{Arc, Mutex};

use crate::error::{CairnError, Result};
use crate::store::{Block, BlockStore, BlockStoreStats, LogicalAddr, PerVolumeStats, BLOCK_SIZE};

/// First address handed out by a [`MemStore`].
pub const MEMSTORE_BASE: LogicalAddr = 811;

/// Callback invoked with the assigned address of every appended block.
pub type AppendCallback = Box<dyn Fn(LogicalAddr) + Send + Sync>;

struct MemInner {
    buffer: Vec<u8>,
    write_pos: u64,
    removed_pos: u64,
}

/// In-memory [`BlockStore`] with watermark-based removal.
pub struct MemStore {
    inner: Mutex<MemInner>,
    append_callback: Option<AppendCallback>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemInner {
                buffer: Vec::new(),
                write_pos: 0,
                removed_pos: 0,
            }),
            append_callback: None,
        }
    }

    /// Creates an empty store that reports every assigned address to
    /// `callback` before `append_block` returns.
    pub fn with_append_callback(callback: AppendCallback) -> Self {
        Self {
            inner: Mutex::new(MemInner {
                buffer: Vec::new(),
                write_pos: 0,
                removed_pos: 0,
            }),
            append_callback: Some(callback),
        }
    }

    /// Marks every block below write position `pos` as removed; reads of
    /// those addresses fail from now on.
    pub fn remove(&self, pos: u64) {
        self.inner.lock().unwrap().removed_pos = pos;
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemStore {
    fn read_block(&self, addr: LogicalAddr) -> Result<Arc<Block>> {
        let pos = addr
            .checked_sub(MEMSTORE_BASE)
            .ok_or(CairnError::BadArg("address below store base"))?;
        let inner = self.inner.lock().unwrap();
        if pos < inner.removed_pos {
            return Err(CairnError::BadArg("address has been removed"));
        }
        let offset = pos as usize * BLOCK_SIZE;
        if inner.buffer.len() < offset + BLOCK_SIZE {
            return Err(CairnError::BadArg("address does not exist"));
        }
        let data = inner.buffer[offset..offset + BLOCK_SIZE].to_vec();
        Ok(Arc::new(Block::from_parts(addr, data)))
    }

    fn append_block(&self, block: &mut Block) -> Result<LogicalAddr> {
        let mut inner = self.inner.lock().unwrap();
        inner.buffer.extend_from_slice(block.data());
        let addr = inner.write_pos + MEMSTORE_BASE;
        if let Some(callback) = &self.append_callback {
            callback(addr);
        }
        inner.write_pos += 1;
        block.set_addr(addr);
        Ok(addr)
    }

    fn exists(&self, addr: LogicalAddr) -> bool {
        let Some(pos) = addr.checked_sub(MEMSTORE_BASE) else {
            return false;
        };
        let inner = self.inner.lock().unwrap();
        pos < inner.write_pos
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> BlockStoreStats {
        let inner = self.inner.lock().unwrap();
        BlockStoreStats {
            block_size: BLOCK_SIZE as u32,
            capacity: 1024,
            nblocks: inner.write_pos,
        }
    }

    fn volume_stats(&self) -> PerVolumeStats {
        let mut result = PerVolumeStats::new();
        result.insert("mem".to_string(), self.stats());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn block_with_tag(tag: u8) -> Block {
        let mut block = Block::new();
        block.data_mut()[0] = tag;
        block
    }

    #[test]
    fn test_addresses_start_at_base() {
        let store = MemStore::new();
        let addr = store.append_block(&mut block_with_tag(1)).unwrap();
        assert_eq!(addr, MEMSTORE_BASE);
        assert!(store.exists(addr));
        assert!(!store.exists(MEMSTORE_BASE - 1));
        assert!(!store.exists(0));
    }

    #[test]
    fn test_append_read_roundtrip() {
        let store = MemStore::new();
        let mut block = block_with_tag(0x42);
        let addr = store.append_block(&mut block).unwrap();
        assert_eq!(block.addr(), addr);

        let read_back = store.read_block(addr).unwrap();
        assert_eq!(read_back.data(), block.data());
    }

    #[test]
    fn test_remove_watermark() {
        let store = MemStore::new();
        for tag in 0..3 {
            store.append_block(&mut block_with_tag(tag)).unwrap();
        }
        store.remove(1);

        assert!(store.read_block(MEMSTORE_BASE).is_err());
        assert!(store.read_block(MEMSTORE_BASE + 1).is_ok());
        assert!(store.read_block(MEMSTORE_BASE + 2).is_ok());
    }

    #[test]
    fn test_append_callback_sees_assigned_address() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_in_callback = Arc::clone(&seen);
        let store = MemStore::with_append_callback(Box::new(move |addr| {
            seen_in_callback.store(addr, Ordering::SeqCst);
        }));

        let addr = store.append_block(&mut block_with_tag(9)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), addr);
    }

    #[test]
    fn test_consecutive_appends_get_distinct_addresses() {
        let store = MemStore::new();
        let a = store.append_block(&mut block_with_tag(1)).unwrap();
        let b = store.append_block(&mut block_with_tag(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_stats() {
        let store = MemStore::new();
        store.append_block(&mut block_with_tag(1)).unwrap();
        let stats = store.stats();
        assert_eq!(stats.block_size, BLOCK_SIZE as u32);
        assert_eq!(stats.nblocks, 1);
        assert_eq!(store.volume_stats()["mem"], stats);
    }
}
