//! Error types for squall using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

/// Error produced by a record source (an external collaborator).
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// The destination URL does not name an object.
    #[snafu(display("Storage URL has no object key: {url}"))]
    MissingKey { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// The backend cannot perform multipart uploads.
    #[snafu(display("Backend {backend} does not support multipart uploads"))]
    MultipartUnsupported { backend: String },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error"))]
    GcsConfig { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Destination path is empty.
    #[snafu(display("Destination path cannot be empty"))]
    EmptyDestination,

    /// Upload part threshold is below the remote minimum part size.
    #[snafu(display(
        "Upload part size ({part_size} bytes) must be at least the minimum part size ({min_part_size} bytes)"
    ))]
    PartSizeTooSmall {
        part_size: usize,
        min_part_size: usize,
    },

    /// A count or size that must be positive was zero.
    #[snafu(display("{field} must be greater than zero"))]
    ZeroValue { field: &'static str },

    /// Compression level outside of the gzip range.
    #[snafu(display("Compression level {level} is out of range (0-9)"))]
    InvalidCompressionLevel { level: u32 },

    /// A size does not fit in memory once converted to bytes.
    #[snafu(display("{field} of {value} is too large"))]
    SizeOverflow { field: &'static str, value: usize },

    /// Delimiter cannot be encoded as a single byte.
    #[snafu(display("Delimiter {delimiter:?} must be a single ASCII character"))]
    InvalidDelimiter { delimiter: char },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Export Error (top-level) ============

/// Top-level export errors.
///
/// Every fatal condition of the streaming pipeline surfaces as one of these.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExportError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Storage setup error.
    #[snafu(display("Storage error"))]
    Storage { source: StorageError },

    /// The record source failed.
    #[snafu(display("Failed to read record from source"))]
    Source { source: SourceError },

    /// A row could not be encoded as CSV.
    #[snafu(display("Failed to encode CSV row"))]
    Encode { source: csv::Error },

    /// The gzip stream or its sink failed.
    #[snafu(display("Compression stream failed"))]
    Compression { source: std::io::Error },

    /// More parts would be needed than the remote service accepts.
    #[snafu(display(
        "Number of parts cannot exceed {max_parts}. Increase the upload part size and try again"
    ))]
    PartLimitExceeded { max_parts: u32 },

    /// The multipart upload could not be created.
    #[snafu(display("Failed to initiate multipart upload"))]
    Initiate { source: StorageError },

    /// A part upload failed.
    #[snafu(display("Failed to upload part {part_number}"))]
    UploadPart {
        part_number: u32,
        source: StorageError,
    },

    /// The remote completion call failed.
    #[snafu(display("Failed to complete multipart upload {upload_id}"))]
    Complete {
        upload_id: String,
        source: StorageError,
    },

    /// Acknowledged parts do not form the sequence 1..=expected.
    #[snafu(display("Expected {expected} completed parts, found {found} in sequence"))]
    IncompleteParts { expected: u32, found: u32 },

    /// The single-request upload used for small outputs failed.
    #[snafu(display("Failed to upload object"))]
    DirectPut { source: StorageError },

    /// Aborting the multipart upload failed; the remote upload may be left incomplete.
    #[snafu(display(
        "Failed to abort multipart upload {upload_id}, the incomplete upload may remain on the remote side (aborting because: {cause})"
    ))]
    Abort {
        upload_id: String,
        cause: String,
        source: StorageError,
    },

    /// An operating-system termination signal was received.
    #[snafu(display("Received shutdown signal, export interrupted"))]
    Interrupted,

    /// The producer stopped because another component failed.
    #[snafu(display("Export cancelled"))]
    Cancelled,

    /// Upload queue closed while the producer was still sending.
    #[snafu(display("Upload queue closed unexpectedly"))]
    QueueClosed,

    /// A session operation was attempted in the wrong state.
    #[snafu(display("Cannot {operation} multipart session in state {state}"))]
    InvalidSessionState {
        operation: &'static str,
        state: &'static str,
    },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

impl ExportError {
    /// Returns true if this error is only a consequence of an earlier failure
    /// or interrupt, rather than a cause in its own right.
    pub fn is_consequence(&self) -> bool {
        matches!(self, ExportError::Cancelled | ExportError::QueueClosed)
    }

    /// Part number of a failed part upload, if this is one.
    pub fn failed_part(&self) -> Option<u32> {
        match self {
            ExportError::UploadPart { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }
}
