//! Columnar chunk compression.
//!
//! A chunk is a triple of parallel columns - timestamps, series ids and
//! values - sorted either by `(series_id, timestamp)` ("chunk order") or by
//! `(timestamp, series_id)` ("time order"). [`encode_chunk`] serializes a
//! chunk-ordered triple into a single block-sized buffer obtained from a
//! [`ChunkWriter`] sink:
//!
//! 1. series ids: delta + zig-zag + run-length + varint;
//! 2. timestamps: delta + zig-zag + run-length + varint;
//! 3. values: byte-wise XOR compression ([`compress_doubles`]).
//!
//! The layout is not self-describing - no magic, no length prefix, no
//! element count. [`decode_chunk`] receives the element count out-of-band,
//! which is what lets the three streams share one buffer without framing.

pub mod grouped;
pub mod layered;
pub mod stream;

use crate::error::{CairnError, Result};
use layered::{int64_reader, int64_writer, StreamSink, StreamSource};
use stream::{StreamReader, StreamWriter};

/// Timestamp of a single data point.
pub type Timestamp = u64;

/// Identifier of a time series.
pub type SeriesId = u64;

/// Columnar triple of parallel timestamp/series-id/value columns.
///
/// Index `i` across the three vectors describes one data point. The struct
/// itself does not enforce an ordering; [`encode_chunk`] expects chunk
/// order, and the `convert_from_*` functions translate between the two
/// canonical orders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UncompressedChunk {
    /// Timestamp column.
    pub timestamps: Vec<Timestamp>,
    /// Series-id column.
    pub series_ids: Vec<SeriesId>,
    /// Value column.
    pub values: Vec<f64>,
}

impl UncompressedChunk {
    /// Creates an empty chunk with room for `n` points per column.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(n),
            series_ids: Vec::with_capacity(n),
            values: Vec::with_capacity(n),
        }
    }

    /// Number of data points in the chunk.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if the chunk holds no data points.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Sink that hands out block-sized memory ranges for chunk encoding.
///
/// `allocate` yields a range sized to a single block; `commit` finalizes
/// how much of it was actually used.
pub trait ChunkWriter {
    /// Allocates space for new data.
    fn allocate(&mut self) -> Result<&mut [u8]>;

    /// Commits `bytes_written` bytes of the last allocated range.
    fn commit(&mut self, bytes_written: usize) -> Result<()>;
}

/// Summary of a successfully encoded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Number of data points written.
    pub n_elements: u32,
    /// First timestamp of the chunk.
    pub ts_begin: Timestamp,
    /// Last timestamp of the chunk.
    pub ts_end: Timestamp,
}

/// Compresses a chunk-ordered triple into `writer`.
///
/// # Errors
///
/// Returns [`CairnError::BadArg`] for an empty chunk, mismatched column
/// lengths or more than `u32::MAX` points. Out-of-space failures from the
/// sink or the bitstream propagate unchanged.
pub fn encode_chunk(writer: &mut dyn ChunkWriter, data: &UncompressedChunk) -> Result<ChunkInfo> {
    let n = data.timestamps.len();
    if n == 0 {
        return Err(CairnError::BadArg("can't encode empty chunk"));
    }
    if data.series_ids.len() != n || data.values.len() != n {
        return Err(CairnError::BadArg("chunk column lengths differ"));
    }
    if n > u32::MAX as usize {
        return Err(CairnError::BadArg("chunk too large"));
    }
    let ts_begin = data.timestamps[0];
    let ts_end = data.timestamps[n - 1];

    let written = {
        let buf = writer.allocate()?;
        let mut stream = StreamWriter::new(buf);
        {
            let mut ids = int64_writer(&mut stream);
            for &id in &data.series_ids {
                ids.put(id as i64)?;
            }
            ids.commit()?;
        }
        {
            let mut timestamps = int64_writer(&mut stream);
            for &ts in &data.timestamps {
                timestamps.put(ts as i64)?;
            }
            timestamps.commit()?;
        }
        compress_doubles(&data.values, &mut stream)?;
        stream.size()
    };
    writer.commit(written)?;

    Ok(ChunkInfo {
        n_elements: n as u32,
        ts_begin,
        ts_end,
    })
}

/// Decompresses `nelements` data points from `buf`.
///
/// # Errors
///
/// Returns [`CairnError::BadData`] when the payload is truncated or
/// violates a codec invariant.
pub fn decode_chunk(buf: &[u8], nelements: u32) -> Result<UncompressedChunk> {
    decode_chunk_inner(buf, nelements).map_err(|err| match err {
        CairnError::OutOfBounds(_) => CairnError::BadData("chunk payload truncated"),
        other => other,
    })
}

fn decode_chunk_inner(buf: &[u8], nelements: u32) -> Result<UncompressedChunk> {
    let n = nelements as usize;
    let mut out = UncompressedChunk::with_capacity(n);
    let mut stream = StreamReader::new(buf);
    {
        let mut ids = int64_reader(&mut stream);
        for _ in 0..n {
            out.series_ids.push(ids.next()? as u64);
        }
    }
    {
        let mut timestamps = int64_reader(&mut stream);
        for _ in 0..n {
            out.timestamps.push(timestamps.next()? as u64);
        }
    }
    decompress_doubles(&mut stream, n, &mut out.values)?;
    Ok(out)
}

/// Compresses doubles by XOR-ing each value's bit pattern with its
/// predecessor.
///
/// Per value, one header byte packs two nibbles - the count of leading zero
/// bytes in the XOR and the count of meaningful bytes - followed by the
/// meaningful bytes verbatim, least significant first. An unchanged value
/// costs a single header byte. The element count is not recorded; the
/// decoder receives it out-of-band.
pub fn compress_doubles(input: &[f64], stream: &mut StreamWriter<'_>) -> Result<()> {
    let mut prev = 0u64;
    for &value in input {
        let bits = value.to_bits();
        let xor = bits ^ prev;
        let (leading, meaningful) = if xor == 0 {
            (8u32, 0u32)
        } else {
            let leading = xor.leading_zeros() / 8;
            let trailing = xor.trailing_zeros() / 8;
            (leading, 8 - leading - trailing)
        };
        stream.put_raw_u8(((leading as u8) << 4) | meaningful as u8)?;
        let mut payload = if meaningful == 0 {
            0
        } else {
            xor >> (8 * (8 - leading - meaningful))
        };
        for _ in 0..meaningful {
            stream.put_raw_u8(payload as u8)?;
            payload >>= 8;
        }
        prev = bits;
    }
    Ok(())
}

/// Inverse of [`compress_doubles`]; reads `numvalues` doubles into `output`.
pub fn decompress_doubles(
    stream: &mut StreamReader<'_>,
    numvalues: usize,
    output: &mut Vec<f64>,
) -> Result<()> {
    let mut prev = 0u64;
    for _ in 0..numvalues {
        let header = stream.read_raw_u8()?;
        let leading = (header >> 4) as u32;
        let meaningful = (header & 0x0F) as u32;
        if leading + meaningful > 8 {
            return Err(CairnError::BadData("invalid double header nibble"));
        }
        let bits = if meaningful == 0 {
            prev
        } else {
            let mut xor = 0u64;
            for i in 0..meaningful {
                xor |= (stream.read_raw_u8()? as u64) << (8 * i);
            }
            let trailing = 8 - leading - meaningful;
            prev ^ (xor << (8 * trailing))
        };
        output.push(f64::from_bits(bits));
        prev = bits;
    }
    Ok(())
}

/// Re-sorts a chunk-ordered triple into time order.
///
/// The sort is stable, so [`convert_from_time_order`] is its exact inverse.
///
/// # Errors
///
/// Returns [`CairnError::BadArg`] if the column lengths differ.
pub fn convert_from_chunk_order(input: &UncompressedChunk) -> Result<UncompressedChunk> {
    reorder(input, |chunk, i| (chunk.timestamps[i], chunk.series_ids[i]))
}

/// Re-sorts a time-ordered triple into chunk order.
///
/// The sort is stable, so [`convert_from_chunk_order`] is its exact inverse.
///
/// # Errors
///
/// Returns [`CairnError::BadArg`] if the column lengths differ.
pub fn convert_from_time_order(input: &UncompressedChunk) -> Result<UncompressedChunk> {
    reorder(input, |chunk, i| (chunk.series_ids[i], chunk.timestamps[i]))
}

fn reorder(
    input: &UncompressedChunk,
    key: impl Fn(&UncompressedChunk, usize) -> (u64, u64),
) -> Result<UncompressedChunk> {
    let n = input.timestamps.len();
    if input.series_ids.len() != n || input.values.len() != n {
        return Err(CairnError::BadArg("chunk column lengths differ"));
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| key(input, i));

    let mut out = UncompressedChunk::with_capacity(n);
    for &i in &order {
        out.timestamps.push(input.timestamps[i]);
        out.series_ids.push(input.series_ids[i]);
        out.values.push(input.values[i]);
    }
    Ok(out)
}
