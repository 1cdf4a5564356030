//! Cairn - block-backed time series persistence core.
//!
//! This crate provides the two lowest layers of a time series storage engine:
//!
//! # Components
//!
//! - [`codec`]: composable byte-stream compression - varint and group-prefix
//!   bitstreams, delta/zig-zag/run-length combinators, and a columnar chunk
//!   codec with a byte-wise XOR double compressor.
//! - [`store`]: fixed-size block persistence - a multi-volume circular
//!   [`FileStorage`], an in-memory [`MemStore`] test double, and a small
//!   two-choice [`BlockCache`] keyed by logical address.
//!
//! Blocks are 4 KiB pages named by a 64-bit logical address composed of a
//! per-volume generation tag and a slot index. Recycling a volume bumps its
//! generation, which makes every address minted under the old generation
//! unreadable instead of silently aliasing new data.
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn::store::{Block, BlockStore, FileStorage};
//!
//! FileStorage::create(&meta_path, &[(1024, vol_path.clone())])?;
//! let storage = FileStorage::open(&meta_path, &[vol_path])?;
//!
//! let mut block = Block::new();
//! block.data_mut()[..4].copy_from_slice(b"data");
//! let addr = storage.append_block(&mut block)?;
//!
//! let read_back = storage.read_block(addr)?;
//! assert_eq!(read_back.data(), block.data());
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod store;

pub use codec::{ChunkInfo, ChunkWriter, SeriesId, Timestamp, UncompressedChunk};
pub use error::{CairnError, Result};
pub use store::{Block, BlockCache, BlockStore, FileStorage, LogicalAddr, MemStore, BLOCK_SIZE};
