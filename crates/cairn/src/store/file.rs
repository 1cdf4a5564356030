//! Multi-volume circular block storage.
//!
//! Blocks are appended to the current volume until it overflows, at which
//! point the store rotates to the next volume in ring order. Rotating into
//! a non-empty volume recycles it: its generation is bumped by the volume
//! count (which preserves `generation % nvolumes == volume index`), its
//! occupancy is reset, and every address minted under the old generation
//! becomes permanently unreadable.
//!
//! The meta-volume is authoritative. Failing to update it mid-append leaves
//! the on-disk state inconsistent with no recovery path, so those failures
//! abort the process; read failures surface as `BadArg` like any other
//! dead address.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::error::{CairnError, Result};
use crate::store::volume::{MetaVolume, Volume};
use crate::store::{
    addr_generation, addr_slot, make_addr, Block, BlockStore, BlockStoreStats, LogicalAddr,
    PerVolumeStats, BLOCK_SIZE,
};

/// Logs the failure and aborts: the store is in an unrecoverable state.
fn fatal(context: &str, err: &CairnError) -> ! {
    error!("{}: {}", context, err);
    panic!("{}: {}", context, err);
}

struct StoreInner {
    meta: MetaVolume,
    volumes: Vec<Volume>,
    volume_names: Vec<String>,
    dirty: Vec<u32>,
    current_volume: usize,
    current_gen: u32,
}

impl StoreInner {
    /// Rotates to the next volume in ring order, recycling it if needed.
    fn advance_volume(&mut self) {
        info!(
            "advancing volume, current generation {}",
            self.current_gen
        );
        self.current_volume = (self.current_volume + 1) % self.volumes.len();
        let cur = self.current_volume;
        self.current_gen = match self.meta.generation(cur) {
            Ok(generation) => generation,
            Err(err) => fatal("can't read generation of the next volume", &err),
        };
        let nblocks = match self.meta.nblocks(cur) {
            Ok(nblocks) => nblocks,
            Err(err) => fatal("can't read occupancy of the next volume", &err),
        };
        if nblocks != 0 {
            // Recycle: new generation, empty cursor.
            self.current_gen += self.volumes.len() as u32;
            if let Err(err) = self.meta.set_generation(cur, self.current_gen) {
                fatal("can't update generation of the recycled volume", &err);
            }
            if let Err(err) = self.meta.set_nblocks(cur, 0) {
                fatal("can't reset occupancy of the recycled volume", &err);
            }
            self.volumes[cur].reset();
            self.dirty[cur] += 1;
        }
    }
}

/// Durable multi-volume circular block store.
///
/// Every operation takes a process-wide mutex; within the critical section
/// operations may block on file I/O. Appends are totally ordered, and a
/// read observes every append that completed before it began.
pub struct FileStorage {
    inner: Mutex<StoreInner>,
}

impl FileStorage {
    /// Creates the backing files for a new store: one pre-sized volume per
    /// `(capacity, path)` pair plus the meta-volume at `metapath`.
    pub fn create(metapath: impl AsRef<Path>, volumes: &[(u32, PathBuf)]) -> Result<()> {
        let mut capacities = Vec::with_capacity(volumes.len());
        for (capacity, path) in volumes {
            Volume::create_new(path, *capacity)?;
            capacities.push(*capacity);
        }
        MetaVolume::create_new(metapath, &capacities)?;
        Ok(())
    }

    /// Opens an existing store from its meta-volume and volume files.
    ///
    /// The current volume is the first one with free space; its generation
    /// becomes the store's current generation.
    ///
    /// # Panics
    ///
    /// Aborts on any meta-volume read failure, including a volume count
    /// that does not match `volpaths` - the store cannot be trusted in
    /// either case.
    pub fn open(metapath: impl AsRef<Path>, volpaths: &[PathBuf]) -> Result<Self> {
        let meta = match MetaVolume::open_existing(metapath) {
            Ok(meta) => meta,
            Err(err) => fatal("can't open block store meta-volume", &err),
        };
        if meta.nvolumes() != volpaths.len() {
            fatal(
                "meta-volume does not match the volume list",
                &CairnError::BadArg("volume count mismatch"),
            );
        }

        let mut volumes = Vec::with_capacity(volpaths.len());
        let mut volume_names = Vec::with_capacity(volpaths.len());
        let mut total_blocks = 0u64;
        for (ix, path) in volpaths.iter().enumerate() {
            let nblocks = match meta.nblocks(ix) {
                Ok(nblocks) => nblocks,
                Err(err) => fatal("can't read volume occupancy from meta-volume", &err),
            };
            let capacity = match meta.capacity(ix) {
                Ok(capacity) => capacity,
                Err(err) => fatal("can't read volume capacity from meta-volume", &err),
            };
            total_blocks += capacity as u64;
            volumes.push(Volume::open_existing(path, nblocks)?);
            volume_names.push(path.to_string_lossy().into_owned());
        }

        // The current volume is the first one with free space available.
        let mut current_volume = 0;
        let mut current_gen = match meta.generation(0) {
            Ok(generation) => generation,
            Err(err) => fatal("can't read volume generation from meta-volume", &err),
        };
        for ix in 0..volumes.len() {
            let nblocks = match meta.nblocks(ix) {
                Ok(nblocks) => nblocks,
                Err(err) => fatal("can't read volume occupancy from meta-volume", &err),
            };
            if volumes[ix].capacity() > nblocks {
                current_volume = ix;
                current_gen = match meta.generation(ix) {
                    Ok(generation) => generation,
                    Err(err) => fatal("can't read volume generation from meta-volume", &err),
                };
                break;
            }
        }

        debug!(
            "opened block store: {} volumes, {} blocks total",
            volumes.len(),
            total_blocks
        );
        let dirty = vec![0; volumes.len()];
        Ok(Self {
            inner: Mutex::new(StoreInner {
                meta,
                volumes,
                volume_names,
                dirty,
                current_volume,
                current_gen,
            }),
        })
    }
}

impl BlockStore for FileStorage {
    fn read_block(&self, addr: LogicalAddr) -> Result<Arc<Block>> {
        let mut inner = self.inner.lock().unwrap();
        let generation = addr_generation(addr);
        let slot = addr_slot(addr);
        let volix = generation as usize % inner.volumes.len();
        let actual_gen = inner
            .meta
            .generation(volix)
            .map_err(|_| CairnError::BadArg("address does not exist"))?;
        let nblocks = inner
            .meta
            .nblocks(volix)
            .map_err(|_| CairnError::BadArg("address does not exist"))?;
        if actual_gen != generation || slot >= nblocks {
            return Err(CairnError::BadArg("address does not exist"));
        }
        let mut data = vec![0u8; BLOCK_SIZE];
        inner.volumes[volix].read_block(slot, &mut data)?;
        Ok(Arc::new(Block::from_parts(addr, data)))
    }

    fn append_block(&self, block: &mut Block) -> Result<LogicalAddr> {
        let mut inner = self.inner.lock().unwrap();
        let cur = inner.current_volume;
        let slot = match inner.volumes[cur].append_block(block.data()) {
            Ok(slot) => slot,
            Err(CairnError::Overflow) => {
                // Rotate to the next generation and retry once.
                inner.advance_volume();
                let cur = inner.current_volume;
                inner.volumes[cur].append_block(block.data())?
            }
            Err(err) => return Err(err),
        };
        let cur = inner.current_volume;
        if let Err(err) = inner.meta.set_nblocks(cur, slot + 1) {
            fatal("invalid block store state, can't update occupancy", &err);
        }
        inner.dirty[cur] += 1;
        let addr = make_addr(inner.current_gen, slot);
        block.set_addr(addr);
        Ok(addr)
    }

    fn exists(&self, addr: LogicalAddr) -> bool {
        let inner = self.inner.lock().unwrap();
        let generation = addr_generation(addr);
        let slot = addr_slot(addr);
        let volix = generation as usize % inner.volumes.len();
        let Ok(actual_gen) = inner.meta.generation(volix) else {
            return false;
        };
        let Ok(nblocks) = inner.meta.nblocks(volix) else {
            return false;
        };
        actual_gen == generation && slot < nblocks
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for ix in 0..inner.volumes.len() {
            inner.volumes[ix].flush()?;
            inner.dirty[ix] = 0;
        }
        inner.meta.flush()
    }

    fn stats(&self) -> BlockStoreStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = BlockStoreStats {
            block_size: BLOCK_SIZE as u32,
            ..Default::default()
        };
        for ix in 0..inner.meta.nvolumes() {
            if let Ok(capacity) = inner.meta.capacity(ix) {
                stats.capacity += capacity as u64;
            }
            if let Ok(nblocks) = inner.meta.nblocks(ix) {
                stats.nblocks += nblocks as u64;
            }
        }
        stats
    }

    fn volume_stats(&self) -> PerVolumeStats {
        let inner = self.inner.lock().unwrap();
        let mut result = PerVolumeStats::new();
        for ix in 0..inner.meta.nvolumes() {
            let mut stats = BlockStoreStats {
                block_size: BLOCK_SIZE as u32,
                ..Default::default()
            };
            if let Ok(capacity) = inner.meta.capacity(ix) {
                stats.capacity = capacity as u64;
            }
            if let Ok(nblocks) = inner.meta.nblocks(ix) {
                stats.nblocks = nblocks as u64;
            }
            result.insert(inner.volume_names[ix].clone(), stats);
        }
        result
    }
}
