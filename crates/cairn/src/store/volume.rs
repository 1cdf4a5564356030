//! Volume and meta-volume files.
//!
//! A volume is a raw sequence of `capacity` blocks with no header: slot `i`
//! occupies bytes `[i * BLOCK_SIZE, (i + 1) * BLOCK_SIZE)`. An append
//! cursor tracks how many leading pages hold data; `reset` rewinds it to
//! zero, which recycles the file without touching its bytes.
//!
//! The meta-volume is the authoritative record of every volume's capacity,
//! occupancy and generation. It stores one 16-byte little-endian record per
//! volume - `[capacity][nblocks][generation][crc32c]` - rewritten in place
//! by the per-field setters and fsynced by `flush`. Record checksums are
//! verified on open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{CairnError, Result};
use crate::store::{checksum, BLOCK_SIZE};

/// A single backing file of fixed capacity in blocks.
pub struct Volume {
    file: File,
    capacity: u32,
    write_pos: u32,
}

impl Volume {
    /// Creates a new volume file of `capacity` zeroed blocks.
    pub fn create_new(path: impl AsRef<Path>, capacity: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        file.set_len(capacity as u64 * BLOCK_SIZE as u64)?;
        debug!(
            "created volume {} with capacity {} blocks",
            path.as_ref().display(),
            capacity
        );
        Ok(Self {
            file,
            capacity,
            write_pos: 0,
        })
    }

    /// Opens an existing volume file with its append cursor at `nblocks`.
    ///
    /// The capacity is derived from the file length, which must be a whole
    /// number of blocks.
    pub fn open_existing(path: impl AsRef<Path>, nblocks: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            return Err(CairnError::BadData("volume length not block-aligned"));
        }
        let capacity = (len / BLOCK_SIZE as u64) as u32;
        if nblocks > capacity {
            return Err(CairnError::BadData("volume cursor beyond capacity"));
        }
        Ok(Self {
            file,
            capacity,
            write_pos: nblocks,
        })
    }

    /// Appends one page and returns the slot it was written to.
    ///
    /// # Errors
    ///
    /// Returns [`CairnError::Overflow`] when every slot is occupied and
    /// [`CairnError::BadArg`] when `data` is not exactly one block.
    pub fn append_block(&mut self, data: &[u8]) -> Result<u32> {
        if data.len() != BLOCK_SIZE {
            return Err(CairnError::BadArg("page must be exactly one block"));
        }
        if self.write_pos >= self.capacity {
            return Err(CairnError::Overflow);
        }
        self.file
            .seek(SeekFrom::Start(self.write_pos as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(data)?;
        let slot = self.write_pos;
        self.write_pos += 1;
        Ok(slot)
    }

    /// Reads the page at `slot` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`CairnError::BadArg`] for a slot at or past the append
    /// cursor or a wrong-sized destination.
    pub fn read_block(&mut self, slot: u32, dest: &mut [u8]) -> Result<()> {
        if dest.len() != BLOCK_SIZE {
            return Err(CairnError::BadArg("destination must be exactly one block"));
        }
        if slot >= self.write_pos {
            return Err(CairnError::BadArg("slot past the append cursor"));
        }
        self.file
            .seek(SeekFrom::Start(slot as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(dest)?;
        Ok(())
    }

    /// Rewinds the append cursor to zero, recycling the volume.
    pub fn reset(&mut self) {
        self.write_pos = 0;
    }

    /// Flushes file contents to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Capacity in blocks.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current append cursor.
    pub fn nblocks(&self) -> u32 {
        self.write_pos
    }
}

/// On-disk record size of one volume entry in the meta-volume.
const META_RECORD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy)]
struct VolumeRecord {
    capacity: u32,
    nblocks: u32,
    generation: u32,
}

impl VolumeRecord {
    fn to_bytes(self) -> [u8; META_RECORD_SIZE] {
        let mut bytes = [0u8; META_RECORD_SIZE];
        bytes[0..4].copy_from_slice(&self.capacity.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.nblocks.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.generation.to_le_bytes());
        let crc = checksum(&bytes[0..12]);
        bytes[12..16].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let stored_crc = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        if checksum(&bytes[0..12]) != stored_crc {
            return Err(CairnError::BadData("meta-volume record checksum mismatch"));
        }
        Ok(Self {
            capacity: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            nblocks: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            generation: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        })
    }
}

/// Durable store of per-volume capacity, occupancy and generation.
pub struct MetaVolume {
    file: File,
    records: Vec<VolumeRecord>,
}

impl MetaVolume {
    /// Creates a new meta-volume for volumes of the given capacities.
    ///
    /// Generations are seeded with the volume index, which keeps
    /// `generation % nvolumes` equal to the volume index across recycles.
    pub fn create_new(path: impl AsRef<Path>, capacities: &[u32]) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let records: Vec<VolumeRecord> = capacities
            .iter()
            .enumerate()
            .map(|(ix, &capacity)| VolumeRecord {
                capacity,
                nblocks: 0,
                generation: ix as u32,
            })
            .collect();
        let mut meta = Self { file, records };
        for ix in 0..meta.records.len() {
            meta.write_record(ix)?;
        }
        meta.flush()?;
        debug!(
            "created meta-volume {} for {} volumes",
            path.as_ref().display(),
            capacities.len()
        );
        Ok(meta)
    }

    /// Opens an existing meta-volume, verifying every record checksum.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        if bytes.is_empty() || bytes.len() % META_RECORD_SIZE != 0 {
            return Err(CairnError::BadData("meta-volume length is not record-aligned"));
        }
        let records = bytes
            .chunks_exact(META_RECORD_SIZE)
            .map(VolumeRecord::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { file, records })
    }

    /// Number of volumes tracked by this meta-volume.
    pub fn nvolumes(&self) -> usize {
        self.records.len()
    }

    /// Capacity of volume `ix` in blocks.
    pub fn capacity(&self, ix: usize) -> Result<u32> {
        Ok(self.record(ix)?.capacity)
    }

    /// Occupancy of volume `ix` in blocks.
    pub fn nblocks(&self, ix: usize) -> Result<u32> {
        Ok(self.record(ix)?.nblocks)
    }

    /// Generation tag of volume `ix`.
    pub fn generation(&self, ix: usize) -> Result<u32> {
        Ok(self.record(ix)?.generation)
    }

    /// Sets the occupancy of volume `ix` and writes the record through.
    pub fn set_nblocks(&mut self, ix: usize, nblocks: u32) -> Result<()> {
        let record = self.record(ix)?;
        if nblocks > record.capacity {
            return Err(CairnError::BadArg("nblocks beyond volume capacity"));
        }
        self.records[ix].nblocks = nblocks;
        self.write_record(ix)
    }

    /// Sets the generation of volume `ix` and writes the record through.
    pub fn set_generation(&mut self, ix: usize, generation: u32) -> Result<()> {
        self.record(ix)?;
        self.records[ix].generation = generation;
        self.write_record(ix)
    }

    /// Flushes all records to durable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn record(&self, ix: usize) -> Result<VolumeRecord> {
        self.records
            .get(ix)
            .copied()
            .ok_or(CairnError::BadArg("volume index out of range"))
    }

    fn write_record(&mut self, ix: usize) -> Result<()> {
        let bytes = self.records[ix].to_bytes();
        self.file
            .seek(SeekFrom::Start((ix * META_RECORD_SIZE) as u64))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }
}
