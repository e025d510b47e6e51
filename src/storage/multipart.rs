//! Remote multipart upload boundary.
//!
//! [`MultipartTarget`] is the contract the export pipeline drives. The
//! wire protocol, authentication and retries live behind it.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::PutPayload;
use object_store::multipart::PartId;
use snafu::prelude::*;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::StorageProvider;
use crate::emit;
use crate::error::{MultipartUnsupportedSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

/// Identifier of a remote multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(pub String);

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag returned by the remote service for an uploaded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartETag(pub String);

/// A part acknowledged by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: PartETag,
}

/// Operations of a multipart-capable object destination.
///
/// Part numbers are 1-based.
#[async_trait]
pub trait MultipartTarget: Send + Sync {
    /// Start a multipart upload.
    async fn initiate_multipart(&self) -> Result<UploadId, StorageError>;

    /// Upload one part.
    async fn upload_part(
        &self,
        upload_id: &UploadId,
        part_number: u32,
        payload: Bytes,
    ) -> Result<PartETag, StorageError>;

    /// Assemble the object from parts in ascending part-number order.
    ///
    /// Returns the final object location.
    async fn complete_multipart(
        &self,
        upload_id: &UploadId,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StorageError>;

    /// Discard the upload and all parts uploaded so far.
    async fn abort_multipart(&self, upload_id: &UploadId) -> Result<(), StorageError>;

    /// Write the whole object in one request.
    async fn put_object(&self, payload: Bytes) -> Result<(), StorageError>;
}

/// Run a store request and record its outcome.
async fn instrumented<T, F>(operation: StorageOperation, request: F) -> object_store::Result<T>
where
    F: Future<Output = object_store::Result<T>>,
{
    let start = Instant::now();
    let result = request.await;
    emit!(StorageRequest {
        operation,
        status: if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        },
        duration: start.elapsed(),
    });
    result
}

#[async_trait]
impl MultipartTarget for StorageProvider {
    async fn initiate_multipart(&self) -> Result<UploadId, StorageError> {
        let store = self.multipart_store()?;
        let id = instrumented(
            StorageOperation::CreateMultipart,
            store.create_multipart(&self.path),
        )
        .await
        .context(ObjectStoreSnafu)?;
        debug!(path = %self.path, upload_id = %id, "Created multipart upload");
        Ok(UploadId(id))
    }

    async fn upload_part(
        &self,
        upload_id: &UploadId,
        part_number: u32,
        payload: Bytes,
    ) -> Result<PartETag, StorageError> {
        let store = self.multipart_store()?;
        // The store indexes parts from zero.
        let index = part_number.saturating_sub(1) as usize;
        let part = instrumented(
            StorageOperation::PutPart,
            store.put_part(&self.path, &upload_id.0, index, PutPayload::from(payload)),
        )
        .await
        .context(ObjectStoreSnafu)?;
        Ok(PartETag(part.content_id))
    }

    async fn complete_multipart(
        &self,
        upload_id: &UploadId,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StorageError> {
        let store = self.multipart_store()?;
        let part_ids = parts
            .into_iter()
            .map(|part| PartId {
                content_id: part.etag.0,
            })
            .collect();
        let result = instrumented(
            StorageOperation::CompleteMultipart,
            store.complete_multipart(&self.path, &upload_id.0, part_ids),
        )
        .await
        .context(ObjectStoreSnafu)?;
        debug!(path = %self.path, e_tag = ?result.e_tag, "Completed multipart upload");
        Ok(self.canonical_url.clone())
    }

    async fn abort_multipart(&self, upload_id: &UploadId) -> Result<(), StorageError> {
        let store = self.multipart_store()?;
        instrumented(
            StorageOperation::AbortMultipart,
            store.abort_multipart(&self.path, &upload_id.0),
        )
        .await
        .context(ObjectStoreSnafu)
    }

    async fn put_object(&self, payload: Bytes) -> Result<(), StorageError> {
        instrumented(
            StorageOperation::Put,
            self.object_store.put(&self.path, PutPayload::from(payload)),
        )
        .await
        .context(ObjectStoreSnafu)?;
        Ok(())
    }
}

impl StorageProvider {
    fn multipart_store(
        &self,
    ) -> Result<&Arc<dyn object_store::multipart::MultipartStore>, StorageError> {
        self.multipart_store
            .as_ref()
            .context(MultipartUnsupportedSnafu {
                backend: self.config.backend_name(),
            })
    }
}
