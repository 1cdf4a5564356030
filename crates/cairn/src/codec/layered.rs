//! Layered codec combinators: delta, zig-zag and run-length stages that
//! stack on top of a bitstream.
//!
//! Each stage is a thin wrapper that owns the stage below it and presents
//! the same `put`/`next` contract through the [`StreamSink`] and
//! [`StreamSource`] traits. Stacks are monomorphized, so a fully composed
//! pipeline compiles down to straight-line integer arithmetic over the
//! underlying stream.
//!
//! The canonical integer pipeline is
//! `i64 -> Delta -> ZigZag -> RLE -> varint stream`, built with
//! [`int64_writer`] and inverted with [`int64_reader`].

use crate::codec::grouped::{GroupedStreamReader, GroupedStreamWriter};
use crate::codec::stream::{StreamReader, StreamWriter};
use crate::error::{CairnError, Result};

/// Sink half of a codec layer.
pub trait StreamSink<T> {
    /// Pushes one value into this layer.
    fn put(&mut self, value: T) -> Result<()>;

    /// Flushes buffered state down the stack and finalizes the stream.
    fn commit(&mut self) -> Result<()>;
}

/// Source half of a codec layer.
pub trait StreamSource<T> {
    /// Pulls the next value out of this layer.
    fn next(&mut self) -> Result<T>;
}

impl StreamSink<u64> for &mut StreamWriter<'_> {
    fn put(&mut self, value: u64) -> Result<()> {
        StreamWriter::put(self, value)
    }

    fn commit(&mut self) -> Result<()> {
        StreamWriter::commit(self)
    }
}

impl StreamSource<u64> for &mut StreamReader<'_> {
    fn next(&mut self) -> Result<u64> {
        StreamReader::next(self)
    }
}

impl StreamSink<u64> for &mut GroupedStreamWriter<'_> {
    fn put(&mut self, value: u64) -> Result<()> {
        GroupedStreamWriter::put(self, value)
    }

    fn commit(&mut self) -> Result<()> {
        GroupedStreamWriter::commit(self)
    }
}

impl StreamSource<u64> for &mut GroupedStreamReader<'_> {
    fn next(&mut self) -> Result<u64> {
        GroupedStreamReader::next(self)
    }
}

/// Delta stage: stores the difference from the previous value.
///
/// The initial predecessor is zero, so the state is identical on both sides
/// without any handshake.
pub struct DeltaWriter<W> {
    inner: W,
    prev: i64,
}

impl<W> DeltaWriter<W> {
    /// Wraps `inner` with delta encoding.
    pub fn new(inner: W) -> Self {
        Self { inner, prev: 0 }
    }
}

impl<W: StreamSink<i64>> StreamSink<i64> for DeltaWriter<W> {
    fn put(&mut self, value: i64) -> Result<()> {
        self.inner.put(value.wrapping_sub(self.prev))?;
        self.prev = value;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }
}

/// Inverse of [`DeltaWriter`]: accumulates deltas back into values.
pub struct DeltaReader<R> {
    inner: R,
    prev: i64,
}

impl<R> DeltaReader<R> {
    /// Wraps `inner` with delta decoding.
    pub fn new(inner: R) -> Self {
        Self { inner, prev: 0 }
    }
}

impl<R: StreamSource<i64>> StreamSource<i64> for DeltaReader<R> {
    fn next(&mut self) -> Result<i64> {
        let delta = self.inner.next()?;
        self.prev = self.prev.wrapping_add(delta);
        Ok(self.prev)
    }
}

/// Zig-zag stage: maps signed values onto unsigned ones so that small
/// magnitudes of either sign stay small.
pub struct ZigZagWriter<W> {
    inner: W,
}

impl<W> ZigZagWriter<W> {
    /// Wraps `inner` with zig-zag encoding.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: StreamSink<u64>> StreamSink<i64> for ZigZagWriter<W> {
    fn put(&mut self, value: i64) -> Result<()> {
        self.inner.put(((value << 1) ^ (value >> 63)) as u64)
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }
}

/// Inverse of [`ZigZagWriter`].
pub struct ZigZagReader<R> {
    inner: R,
}

impl<R> ZigZagReader<R> {
    /// Wraps `inner` with zig-zag decoding.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: StreamSource<u64>> StreamSource<i64> for ZigZagReader<R> {
    fn next(&mut self) -> Result<i64> {
        let n = self.inner.next()?;
        Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
    }
}

/// Run-length stage: coalesces runs of equal values into
/// `(run_length, value)` pairs.
///
/// Pending state is only flushed on a value change or on `commit`, so
/// `commit` is mandatory after the final `put`.
pub struct RleWriter<W> {
    inner: W,
    prev: u64,
    reps: u64,
}

impl<W> RleWriter<W> {
    /// Wraps `inner` with run-length encoding.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            prev: 0,
            reps: 0,
        }
    }
}

impl<W: StreamSink<u64>> StreamSink<u64> for RleWriter<W> {
    fn put(&mut self, value: u64) -> Result<()> {
        if value != self.prev {
            if self.reps > 0 {
                self.inner.put(self.reps)?;
                self.inner.put(self.prev)?;
            }
            self.prev = value;
            self.reps = 0;
        }
        self.reps += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.reps > 0 {
            self.inner.put(self.reps)?;
            self.inner.put(self.prev)?;
            self.reps = 0;
        }
        self.inner.commit()
    }
}

/// Inverse of [`RleWriter`]: refills a `(reps, value)` pair lazily and
/// hands out one value per `next`.
pub struct RleReader<R> {
    inner: R,
    prev: u64,
    reps: u64,
}

impl<R> RleReader<R> {
    /// Wraps `inner` with run-length decoding.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            prev: 0,
            reps: 0,
        }
    }
}

impl<R: StreamSource<u64>> StreamSource<u64> for RleReader<R> {
    fn next(&mut self) -> Result<u64> {
        if self.reps == 0 {
            self.reps = self.inner.next()?;
            if self.reps == 0 {
                return Err(CairnError::BadData("zero-length run"));
            }
            self.prev = self.inner.next()?;
        }
        self.reps -= 1;
        Ok(self.prev)
    }
}

/// Canonical integer pipeline writer:
/// `i64 -> Delta -> ZigZag -> RLE -> varint stream`.
pub type Int64Writer<'a, 'b> = DeltaWriter<ZigZagWriter<RleWriter<&'a mut StreamWriter<'b>>>>;

/// Canonical integer pipeline reader, the inverse of [`Int64Writer`].
pub type Int64Reader<'a, 'b> = DeltaReader<ZigZagReader<RleReader<&'a mut StreamReader<'b>>>>;

/// Builds the canonical integer pipeline over `stream`.
pub fn int64_writer<'a, 'b>(stream: &'a mut StreamWriter<'b>) -> Int64Writer<'a, 'b> {
    DeltaWriter::new(ZigZagWriter::new(RleWriter::new(stream)))
}

/// Builds the inverse of [`int64_writer`] over `stream`.
pub fn int64_reader<'a, 'b>(stream: &'a mut StreamReader<'b>) -> Int64Reader<'a, 'b> {
    DeltaReader::new(ZigZagReader::new(RleReader::new(stream)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rle_pair_structure() {
        // Deltas of [10, 11, 12, 12, 12, 13] are [10, 1, 1, 0, 0, 1];
        // zig-zag doubles the non-negative deltas; RLE coalesces them into
        // four (run, value) pairs.
        let mut buf = [0u8; 64];
        let size;
        {
            let mut stream = StreamWriter::new(&mut buf);
            let mut writer = int64_writer(&mut stream);
            for v in [10i64, 11, 12, 12, 12, 13] {
                writer.put(v).unwrap();
            }
            writer.commit().unwrap();
            size = stream.size();
        }

        let mut raw = StreamReader::new(&buf[..size]);
        let mut pairs = Vec::new();
        while raw.space_left() > 0 {
            pairs.push((raw.next().unwrap(), raw.next().unwrap()));
        }
        assert_eq!(pairs, vec![(1, 20), (2, 2), (2, 0), (1, 2)]);
    }

    #[test]
    fn test_pipeline_roundtrip() {
        let values = [10i64, 11, 12, 12, 12, 13];
        let mut buf = [0u8; 64];
        {
            let mut stream = StreamWriter::new(&mut buf);
            let mut writer = int64_writer(&mut stream);
            for &v in &values {
                writer.put(v).unwrap();
            }
            writer.commit().unwrap();
        }

        let mut stream = StreamReader::new(&buf);
        let mut reader = int64_reader(&mut stream);
        for &v in &values {
            assert_eq!(reader.next().unwrap(), v);
        }
    }

    #[test]
    fn test_pipeline_negative_and_extreme_values() {
        let values = [0i64, -1, -1, i64::MIN, i64::MAX, 5, 5, 5, -100];
        let mut buf = [0u8; 256];
        {
            let mut stream = StreamWriter::new(&mut buf);
            let mut writer = int64_writer(&mut stream);
            for &v in &values {
                writer.put(v).unwrap();
            }
            writer.commit().unwrap();
        }

        let mut stream = StreamReader::new(&buf);
        let mut reader = int64_reader(&mut stream);
        for &v in &values {
            assert_eq!(reader.next().unwrap(), v);
        }
    }

    #[test]
    fn test_empty_commit_writes_nothing() {
        let mut buf = [0u8; 16];
        let size;
        {
            let mut stream = StreamWriter::new(&mut buf);
            let mut writer = int64_writer(&mut stream);
            writer.commit().unwrap();
            size = stream.size();
        }
        assert_eq!(size, 0);
    }

    #[test]
    fn test_zero_length_run_is_bad_data() {
        let mut buf = [0u8; 8];
        {
            let mut stream = StreamWriter::new(&mut buf);
            stream.put(0).unwrap();
            stream.put(42).unwrap();
        }
        let mut stream = StreamReader::new(&buf);
        let mut reader = RleReader::new(&mut stream);
        assert!(matches!(
            StreamSource::<u64>::next(&mut reader),
            Err(CairnError::BadData(_))
        ));
    }

    #[test]
    fn test_layers_over_grouped_stream() {
        let values = [100i64, 100, 100, 250, -3, -3];
        let mut buf = vec![0u8; 128];
        {
            let mut stream = GroupedStreamWriter::new(&mut buf);
            let mut writer =
                DeltaWriter::new(ZigZagWriter::new(RleWriter::new(&mut stream)));
            for &v in &values {
                writer.put(v).unwrap();
            }
            writer.commit().unwrap();
        }

        let mut stream = GroupedStreamReader::new(&buf);
        let mut reader = DeltaReader::new(ZigZagReader::new(RleReader::new(&mut stream)));
        for &v in &values {
            assert_eq!(reader.next().unwrap(), v);
        }
    }
}
