//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the export
//! pipeline. Events implement the `InternalEvent` trait which records the
//! corresponding Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when rows are encoded into the output stream.
pub struct RowsExported {
    pub count: u64,
}

impl InternalEvent for RowsExported {
    fn emit(self) {
        trace!(count = self.count, "Rows exported");
        counter!("squall_rows_exported_total").increment(self.count);
    }
}

/// Event emitted when encoded CSV bytes are fed to the compressor.
pub struct BytesUncompressed {
    pub bytes: u64,
}

impl InternalEvent for BytesUncompressed {
    fn emit(self) {
        trace!(bytes = self.bytes, "Uncompressed bytes");
        counter!("squall_uncompressed_bytes_total").increment(self.bytes);
    }
}

/// Event emitted when the compressor hands a segment to the part sizer.
pub struct SegmentFlushed {
    pub bytes: u64,
}

impl InternalEvent for SegmentFlushed {
    fn emit(self) {
        trace!(bytes = self.bytes, "Segment flushed");
        counter!("squall_segments_flushed_total").increment(1);
        counter!("squall_compressed_bytes_total").increment(self.bytes);
    }
}

/// Event emitted when a part is placed on the upload queue.
pub struct PartEnqueued {
    pub bytes: u64,
}

impl InternalEvent for PartEnqueued {
    fn emit(self) {
        trace!(bytes = self.bytes, "Part enqueued");
        counter!("squall_parts_enqueued_total").increment(1);
    }
}

/// Event emitted when a part upload succeeds.
pub struct PartUploaded {
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for PartUploaded {
    fn emit(self) {
        trace!(
            bytes = self.bytes,
            duration_ms = self.duration.as_millis(),
            "Part uploaded"
        );
        counter!("squall_parts_uploaded_total").increment(1);
        counter!("squall_uploaded_bytes_total").increment(self.bytes);
        histogram!("squall_part_upload_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a part upload fails.
pub struct PartUploadFailed;

impl InternalEvent for PartUploadFailed {
    fn emit(self) {
        trace!("Part upload failed");
        counter!("squall_parts_failed_total").increment(1);
    }
}

// ============================================================================
// Gauge events for concurrency and backpressure
// ============================================================================

/// Event emitted when the number of in-flight part uploads changes.
pub struct ActiveUploads {
    pub count: usize,
}

impl InternalEvent for ActiveUploads {
    fn emit(self) {
        trace!(count = self.count, "Active uploads");
        gauge!("squall_active_uploads").set(self.count as f64);
    }
}

/// Event emitted when the upload queue depth changes.
pub struct UploadQueueDepth {
    pub count: usize,
}

impl InternalEvent for UploadQueueDepth {
    fn emit(self) {
        trace!(count = self.count, "Upload queue depth");
        gauge!("squall_upload_queue_depth").set(self.count as f64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Put,
    CreateMultipart,
    PutPart,
    CompleteMultipart,
    AbortMultipart,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Put => "put",
            StorageOperation::CreateMultipart => "create_multipart",
            StorageOperation::PutPart => "put_part",
            StorageOperation::CompleteMultipart => "complete_multipart",
            StorageOperation::AbortMultipart => "abort_multipart",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request finishes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "squall_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "squall_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Export outcome events
// ============================================================================

/// Event emitted when a multipart upload is finalized.
pub struct MultipartUploadCompleted {
    pub parts: u32,
}

impl InternalEvent for MultipartUploadCompleted {
    fn emit(self) {
        trace!(parts = self.parts, "Multipart upload completed");
        counter!("squall_multipart_uploads_total", "outcome" => "completed").increment(1);
    }
}

/// Event emitted when a multipart upload is aborted.
pub struct MultipartUploadAborted;

impl InternalEvent for MultipartUploadAborted {
    fn emit(self) {
        trace!("Multipart upload aborted");
        counter!("squall_multipart_uploads_total", "outcome" => "aborted").increment(1);
    }
}

/// Event emitted when a small output is written with a single put.
pub struct DirectPutCompleted {
    pub bytes: u64,
}

impl InternalEvent for DirectPutCompleted {
    fn emit(self) {
        trace!(bytes = self.bytes, "Direct put completed");
        counter!("squall_direct_puts_total").increment(1);
    }
}
