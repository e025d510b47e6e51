//! Incremental gzip compression.
//!
//! [`Compressor`] wraps any `io::Write` sink. A flush ends a deflate block
//! with a sync marker, so everything written so far can be decoded, while the
//! stream itself stays open. Concatenating all flushed bytes and the bytes
//! written by [`Compressor::finish`] yields one valid gzip member.

use bytes::buf::Writer;
use bytes::{BufMut, BytesMut};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{self, Write};

use super::CompressedSegment;

/// Flush-capable gzip stream over a sink.
pub struct Compressor<W: Write> {
    encoder: GzEncoder<W>,
}

impl<W: Write> Compressor<W> {
    /// Create a compressor writing to `sink` at the given level (0-9).
    pub fn new(sink: W, level: u32) -> Self {
        Self {
            encoder: GzEncoder::new(sink, Compression::new(level)),
        }
    }

    /// Compress `buf` into the stream.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.encoder.write_all(buf)
    }

    /// End the current segment and push all compressed bytes to the sink.
    pub fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }

    /// Finalize the stream and return the sink.
    pub fn finish(self) -> io::Result<W> {
        self.encoder.finish()
    }

    fn get_mut(&mut self) -> &mut W {
        self.encoder.get_mut()
    }
}

/// Compressor that collects its output in memory, segment by segment.
pub type SegmentCompressor = Compressor<Writer<BytesMut>>;

impl Compressor<Writer<BytesMut>> {
    /// Create a compressor over a fresh in-memory buffer.
    pub fn in_memory(level: u32) -> Self {
        Self::new(BytesMut::new().writer(), level)
    }

    /// Flush and hand out the bytes produced since the previous segment.
    ///
    /// The returned bytes are detached from the internal buffer, which keeps
    /// any spare capacity for the next segment.
    pub fn flush_segment(&mut self) -> io::Result<CompressedSegment> {
        self.flush()?;
        let bytes = self.get_mut().get_mut().split().freeze();
        Ok(CompressedSegment {
            bytes,
            is_last: false,
        })
    }

    /// Finalize the stream and return the terminal segment.
    pub fn finish_segment(self) -> io::Result<CompressedSegment> {
        let mut sink = self.finish()?;
        let bytes = sink.get_mut().split().freeze();
        Ok(CompressedSegment {
            bytes,
            is_last: true,
        })
    }
}
