//! Integration tests for the file-backed block store.

use std::path::PathBuf;

use cairn::error::CairnError;
use cairn::store::{addr_generation, addr_slot, Block, BlockStore, FileStorage, BLOCK_SIZE};
use tempfile::TempDir;

/// Creates the on-disk files for a store with the given volume capacities.
fn create_store(dir: &TempDir, capacities: &[u32]) -> (PathBuf, Vec<PathBuf>) {
    let metapath = dir.path().join("store.meta");
    let volpaths: Vec<PathBuf> = (0..capacities.len())
        .map(|ix| dir.path().join(format!("store.vol{}", ix)))
        .collect();
    let volumes: Vec<(u32, PathBuf)> = capacities
        .iter()
        .copied()
        .zip(volpaths.iter().cloned())
        .collect();
    FileStorage::create(&metapath, &volumes).unwrap();
    (metapath, volpaths)
}

/// Builds a block whose first bytes identify it.
fn block_with_tag(tag: u32) -> Block {
    let mut block = Block::new();
    block.data_mut()[..4].copy_from_slice(&tag.to_le_bytes());
    block
}

fn tag_of(block: &Block) -> u32 {
    u32::from_le_bytes(block.data()[..4].try_into().unwrap())
}

#[test]
fn test_generation_cycling_over_two_volumes() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[3, 3]);
    let storage = FileStorage::open(&metapath, &volpaths).unwrap();

    let addrs: Vec<_> = (0..7)
        .map(|tag| storage.append_block(&mut block_with_tag(tag)).unwrap())
        .collect();

    // Volume 0 fills under its initial generation, volume 1 under its own;
    // the seventh append wraps back to volume 0 under a bumped generation.
    let generations: Vec<u32> = addrs.iter().map(|&a| addr_generation(a)).collect();
    assert_eq!(generations, vec![0, 0, 0, 1, 1, 1, 2]);

    let slots: Vec<u32> = addrs.iter().map(|&a| addr_slot(a)).collect();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn test_consecutive_appends_return_distinct_addresses() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[2, 2]);
    let storage = FileStorage::open(&metapath, &volpaths).unwrap();

    let mut addrs = Vec::new();
    for tag in 0..6 {
        addrs.push(storage.append_block(&mut block_with_tag(tag)).unwrap());
    }
    let mut unique = addrs.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), addrs.len());
}

#[test]
fn test_generation_grows_by_volume_count_per_cycle() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[2, 2]);
    let storage = FileStorage::open(&metapath, &volpaths).unwrap();

    // Fill both volumes, then run two more full cycles.
    let mut generations = Vec::new();
    for tag in 0..12 {
        let addr = storage.append_block(&mut block_with_tag(tag)).unwrap();
        generations.push(addr_generation(addr));
    }
    // Each full cycle through both volumes raises every generation by 2.
    assert_eq!(generations, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
}

#[test]
fn test_recycled_address_reads_fail() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[2, 2]);
    let storage = FileStorage::open(&metapath, &volpaths).unwrap();

    let first = storage.append_block(&mut block_with_tag(0)).unwrap();
    assert!(storage.exists(first));

    // Cycle all the way around so volume 0 is recycled.
    for tag in 1..5 {
        storage.append_block(&mut block_with_tag(tag)).unwrap();
    }

    assert!(!storage.exists(first));
    assert!(matches!(
        storage.read_block(first),
        Err(CairnError::BadArg(_))
    ));

    // The slot is live again under the new generation.
    let recycled = storage.append_block(&mut block_with_tag(5)).unwrap();
    assert_eq!(addr_slot(recycled), addr_slot(first));
    assert_ne!(addr_generation(recycled), addr_generation(first));
    assert_eq!(tag_of(&storage.read_block(recycled).unwrap()), 5);
}

#[test]
fn test_reads_return_exact_bytes() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[3, 3]);
    let storage = FileStorage::open(&metapath, &volpaths).unwrap();

    let addrs: Vec<_> = (0..5)
        .map(|tag| storage.append_block(&mut block_with_tag(tag)).unwrap())
        .collect();

    for (tag, &addr) in addrs.iter().enumerate() {
        let block = storage.read_block(addr).unwrap();
        assert_eq!(block.addr(), addr);
        assert_eq!(tag_of(&block), tag as u32);
        assert_eq!(block.data().len(), BLOCK_SIZE);
    }
}

#[test]
fn test_flush_and_reopen_preserves_state() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[3, 3]);

    let addrs: Vec<_> = {
        let storage = FileStorage::open(&metapath, &volpaths).unwrap();
        let addrs = (0..4)
            .map(|tag| storage.append_block(&mut block_with_tag(tag)).unwrap())
            .collect();
        storage.flush().unwrap();
        addrs
    };

    let storage = FileStorage::open(&metapath, &volpaths).unwrap();
    for (tag, &addr) in addrs.iter().enumerate() {
        assert!(storage.exists(addr));
        assert_eq!(tag_of(&storage.read_block(addr).unwrap()), tag as u32);
    }

    // The reopened store resumes in the first volume with free space.
    let next = storage.append_block(&mut block_with_tag(99)).unwrap();
    assert_eq!(addr_generation(next), 1);
    assert_eq!(addr_slot(next), 1);

    let stats = storage.stats();
    assert_eq!(stats.capacity, 6);
    assert_eq!(stats.nblocks, 5);
}

#[test]
fn test_checksum_available_through_the_store() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[2]);
    let storage = FileStorage::open(&metapath, &volpaths).unwrap();

    assert_eq!(storage.checksum(b"123456789"), 0xE306_9283);
    assert_eq!(storage.checksum(b"123456789"), cairn::store::checksum(b"123456789"));
}

#[test]
fn test_single_volume_recycles_onto_itself() {
    let dir = TempDir::new().unwrap();
    let (metapath, volpaths) = create_store(&dir, &[2]);
    let storage = FileStorage::open(&metapath, &volpaths).unwrap();

    let a = storage.append_block(&mut block_with_tag(1)).unwrap();
    let b = storage.append_block(&mut block_with_tag(2)).unwrap();
    // The third append recycles the only volume.
    let c = storage.append_block(&mut block_with_tag(3)).unwrap();

    assert_eq!(addr_generation(a), 0);
    assert_eq!(addr_generation(b), 0);
    assert_eq!(addr_generation(c), 1);
    assert_eq!(addr_slot(c), 0);
    assert!(!storage.exists(a));
    assert!(!storage.exists(b));
    assert_eq!(tag_of(&storage.read_block(c).unwrap()), 3);
}
