//! Output stage of the export pipeline.
//!
//! Encodes records as CSV text, compresses them into an incremental gzip
//! stream and cuts the compressed bytes into upload parts.

pub mod encoder;
pub mod gzip;
pub mod parts;

use bytes::Bytes;

pub use encoder::RowEncoder;
pub use gzip::{Compressor, SegmentCompressor};
pub use parts::{DEFAULT_PART_SIZE, MAX_PARTS, MIN_PART_SIZE, PartPolicy, PartSizer};

/// A run of compressed bytes produced by one compressor flush.
#[derive(Debug, Clone)]
pub struct CompressedSegment {
    /// Compressed bytes since the previous flush.
    pub bytes: Bytes,
    /// True once the gzip stream has been finalized.
    pub is_last: bool,
}

/// One unit of a multipart upload.
#[derive(Debug, Clone)]
pub struct Part {
    /// 1-based position of this part in the upload.
    pub part_number: u32,
    /// Compressed payload.
    pub payload: Bytes,
    /// True for the final part of the stream.
    pub is_last: bool,
}

impl Part {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
