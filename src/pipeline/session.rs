//! Multipart session lifecycle.
//!
//! The session is the only owner of the remote upload. Its state and the
//! list of acknowledged parts sit behind one lock, and every transition is
//! checked under that lock, so once an abort has begun a completion can no
//! longer start. The lock is never held across a remote call.

use snafu::prelude::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::emit;
use crate::error::{
    ExportError, IncompletePartsSnafu, InitiateSnafu, InvalidSessionStateSnafu, StorageError,
};
use crate::metrics::events::{MultipartUploadAborted, MultipartUploadCompleted};
use crate::sink::Part;
use crate::storage::{CompletedPart, MultipartTarget, UploadId};

/// Lifecycle of a remote multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitiated,
    Active { upload_id: UploadId },
    Completing { upload_id: UploadId },
    Completed { location: String },
    Aborting { upload_id: UploadId },
    Aborted,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitiated => "uninitiated",
            SessionState::Active { .. } => "active",
            SessionState::Completing { .. } => "completing",
            SessionState::Completed { .. } => "completed",
            SessionState::Aborting { .. } => "aborting",
            SessionState::Aborted => "aborted",
        }
    }
}

/// What happened to an uploaded part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    /// Uploaded and recorded for completion.
    Recorded,
    /// Not recorded because the session is no longer active.
    Discarded,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    completed_parts: Vec<CompletedPart>,
}

/// Owner of one remote multipart upload.
pub struct MultipartSession {
    target: Arc<dyn MultipartTarget>,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for MultipartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartSession")
            .field("state", &self.state())
            .finish()
    }
}

impl MultipartSession {
    pub fn new(target: Arc<dyn MultipartTarget>) -> Self {
        Self {
            target,
            inner: Mutex::new(SessionInner {
                state: SessionState::Uninitiated,
                completed_parts: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Acknowledged parts, in the order they were recorded.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.lock().completed_parts.clone()
    }

    /// Start the remote upload.
    pub async fn initiate(&self) -> Result<UploadId, ExportError> {
        {
            let inner = self.lock();
            ensure!(
                inner.state == SessionState::Uninitiated,
                InvalidSessionStateSnafu {
                    operation: "initiate",
                    state: inner.state.name(),
                }
            );
        }

        let upload_id = self
            .target
            .initiate_multipart()
            .await
            .context(InitiateSnafu)?;

        self.lock().state = SessionState::Active {
            upload_id: upload_id.clone(),
        };
        info!(upload_id = %upload_id, "Initiated multipart upload");
        Ok(upload_id)
    }

    /// Upload one part and record its tag.
    ///
    /// Parts arriving after an abort has begun are not sent, and uploads that
    /// finish after it are not recorded.
    pub async fn upload_part(&self, part: Part) -> Result<PartOutcome, StorageError> {
        let upload_id = {
            let inner = self.lock();
            match &inner.state {
                SessionState::Active { upload_id } => upload_id.clone(),
                _ => return Ok(PartOutcome::Discarded),
            }
        };

        let part_number = part.part_number;
        let etag = self
            .target
            .upload_part(&upload_id, part_number, part.payload)
            .await?;

        let mut inner = self.lock();
        if !matches!(inner.state, SessionState::Active { .. }) {
            return Ok(PartOutcome::Discarded);
        }
        inner
            .completed_parts
            .push(CompletedPart { part_number, etag });
        Ok(PartOutcome::Recorded)
    }

    /// Mark the session as aborting without calling the remote service yet.
    ///
    /// Returns true if this call moved the session out of `Active`.
    pub fn begin_abort(&self) -> bool {
        let mut inner = self.lock();
        let upload_id = match &inner.state {
            SessionState::Active { upload_id } => upload_id.clone(),
            _ => return false,
        };
        inner.state = SessionState::Aborting { upload_id };
        true
    }

    /// Complete the upload from exactly `expected_parts` parts.
    ///
    /// Parts are sorted by part number and must run 1..=expected_parts.
    /// On a remote failure the session moves to `Aborting`.
    pub async fn complete(&self, expected_parts: u32) -> Result<String, ExportError> {
        let (upload_id, parts) = {
            let mut inner = self.lock();
            let upload_id = match &inner.state {
                SessionState::Active { upload_id } => upload_id.clone(),
                other => {
                    return InvalidSessionStateSnafu {
                        operation: "complete",
                        state: other.name(),
                    }
                    .fail();
                }
            };

            let mut parts = inner.completed_parts.clone();
            parts.sort_by_key(|p| p.part_number);
            let in_sequence = parts
                .iter()
                .zip(1u32..)
                .take_while(|(part, expected)| part.part_number == *expected)
                .count() as u32;
            ensure!(
                in_sequence == expected_parts && parts.len() == expected_parts as usize,
                IncompletePartsSnafu {
                    expected: expected_parts,
                    found: in_sequence,
                }
            );

            inner.state = SessionState::Completing {
                upload_id: upload_id.clone(),
            };
            (upload_id, parts)
        };

        match self.target.complete_multipart(&upload_id, parts).await {
            Ok(location) => {
                self.lock().state = SessionState::Completed {
                    location: location.clone(),
                };
                emit!(MultipartUploadCompleted {
                    parts: expected_parts
                });
                Ok(location)
            }
            Err(source) => {
                warn!(upload_id = %upload_id, error = %source, "Failed to complete multipart upload");
                self.lock().state = SessionState::Aborting {
                    upload_id: upload_id.clone(),
                };
                Err(ExportError::Complete {
                    upload_id: upload_id.0,
                    source,
                })
            }
        }
    }

    /// Abort the remote upload.
    ///
    /// `cause` describes why, and is carried in the error if the abort call
    /// itself fails. Aborting a session that was never initiated, or that is
    /// already aborted, is a no-op.
    pub async fn abort(&self, cause: &str) -> Result<(), ExportError> {
        let upload_id = {
            let mut inner = self.lock();
            let upload_id = match &inner.state {
                SessionState::Active { upload_id } | SessionState::Aborting { upload_id } => {
                    upload_id.clone()
                }
                SessionState::Uninitiated | SessionState::Aborted => return Ok(()),
                other => {
                    return InvalidSessionStateSnafu {
                        operation: "abort",
                        state: other.name(),
                    }
                    .fail();
                }
            };
            inner.state = SessionState::Aborting {
                upload_id: upload_id.clone(),
            };
            upload_id
        };

        match self.target.abort_multipart(&upload_id).await {
            Ok(()) => {
                self.lock().state = SessionState::Aborted;
                emit!(MultipartUploadAborted);
                info!(upload_id = %upload_id, cause, "Aborted multipart upload");
                Ok(())
            }
            Err(source) => {
                error!(
                    upload_id = %upload_id,
                    error = %source,
                    "Failed to abort multipart upload, it may remain on the remote side"
                );
                Err(ExportError::Abort {
                    upload_id: upload_id.0,
                    cause: cause.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PartETag, StorageProvider};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn part(part_number: u32, payload: &'static [u8]) -> Part {
        Part {
            part_number,
            payload: Bytes::from_static(payload),
            is_last: false,
        }
    }

    async fn memory_session() -> (Arc<StorageProvider>, MultipartSession) {
        let provider = Arc::new(
            StorageProvider::for_url_with_options("memory://session/out.csv.gz", HashMap::new())
                .await
                .unwrap(),
        );
        let session = MultipartSession::new(provider.clone());
        (provider, session)
    }

    #[tokio::test]
    async fn test_complete_sorts_parts() {
        let target = Arc::new(FakeTarget::default());
        let session = MultipartSession::new(target.clone());
        session.initiate().await.unwrap();

        assert_eq!(
            session.upload_part(part(3, b"c")).await.unwrap(),
            PartOutcome::Recorded
        );
        session.upload_part(part(1, b"a")).await.unwrap();
        session.upload_part(part(2, b"b")).await.unwrap();

        let recorded: Vec<_> = session
            .completed_parts()
            .iter()
            .map(|p| p.part_number)
            .collect();
        assert_eq!(recorded, vec![3, 1, 2]);

        let location = session.complete(3).await.unwrap();
        assert_eq!(location, "fake://out.csv.gz");
        assert!(matches!(session.state(), SessionState::Completed { .. }));
        assert_eq!(*target.completed.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let (provider, session) = memory_session().await;
        session.initiate().await.unwrap();
        session.upload_part(part(1, b"ab")).await.unwrap();
        session.upload_part(part(2, b"c")).await.unwrap();

        let location = session.complete(2).await.unwrap();
        assert_eq!(location, "memory://session/out.csv.gz");
        assert_eq!(provider.get().await.unwrap().as_ref(), b"abc");
    }

    #[tokio::test]
    async fn test_complete_rejects_gaps() {
        let session = MultipartSession::new(Arc::new(FakeTarget::default()));
        session.initiate().await.unwrap();
        session.upload_part(part(1, b"a")).await.unwrap();
        session.upload_part(part(3, b"c")).await.unwrap();

        let err = session.complete(3).await.unwrap_err();
        assert!(matches!(
            err,
            ExportError::IncompleteParts {
                expected: 3,
                found: 1
            }
        ));
        assert!(matches!(session.state(), SessionState::Active { .. }));
    }

    #[tokio::test]
    async fn test_abort_excludes_complete() {
        let (_provider, session) = memory_session().await;
        session.initiate().await.unwrap();
        session.upload_part(part(1, b"a")).await.unwrap();

        assert!(session.begin_abort());
        assert!(!session.begin_abort());

        assert_eq!(
            session.upload_part(part(2, b"b")).await.unwrap(),
            PartOutcome::Discarded
        );
        assert!(matches!(
            session.complete(1).await,
            Err(ExportError::InvalidSessionState {
                operation: "complete",
                ..
            })
        ));

        session.abort("test").await.unwrap();
        assert_eq!(session.state(), SessionState::Aborted);
        // A second abort is a no-op.
        session.abort("test").await.unwrap();
    }

    #[tokio::test]
    async fn test_initiate_twice_is_rejected() {
        let (_provider, session) = memory_session().await;
        session.initiate().await.unwrap();
        assert!(matches!(
            session.initiate().await,
            Err(ExportError::InvalidSessionState { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_before_initiate_is_noop() {
        let (_provider, session) = memory_session().await;
        session.abort("nothing started").await.unwrap();
        assert_eq!(session.state(), SessionState::Uninitiated);
    }

    /// Target that records completions and can refuse aborts.
    #[derive(Default)]
    struct FakeTarget {
        fail_abort: bool,
        aborts: AtomicUsize,
        completed: std::sync::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl MultipartTarget for FakeTarget {
        async fn initiate_multipart(&self) -> Result<UploadId, StorageError> {
            Ok(UploadId("upload-1".to_string()))
        }

        async fn upload_part(
            &self,
            _upload_id: &UploadId,
            part_number: u32,
            _payload: Bytes,
        ) -> Result<PartETag, StorageError> {
            Ok(PartETag(format!("etag-{part_number}")))
        }

        async fn complete_multipart(
            &self,
            _upload_id: &UploadId,
            parts: Vec<CompletedPart>,
        ) -> Result<String, StorageError> {
            *self.completed.lock().unwrap() = parts.iter().map(|p| p.part_number).collect();
            Ok("fake://out.csv.gz".to_string())
        }

        async fn abort_multipart(&self, _upload_id: &UploadId) -> Result<(), StorageError> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            if self.fail_abort {
                return Err(StorageError::Io {
                    source: std::io::Error::other("connection reset"),
                });
            }
            Ok(())
        }

        async fn put_object(&self, _payload: Bytes) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_abort_failure_is_reported() {
        let target = Arc::new(FakeTarget {
            fail_abort: true,
            ..Default::default()
        });
        let session = MultipartSession::new(target.clone());
        session.initiate().await.unwrap();

        let err = session.abort("part 2 failed").await.unwrap_err();
        match err {
            ExportError::Abort {
                upload_id, cause, ..
            } => {
                assert_eq!(upload_id, "upload-1");
                assert_eq!(cause, "part 2 failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(target.aborts.load(Ordering::SeqCst), 1);
        assert!(matches!(session.state(), SessionState::Aborting { .. }));
    }
}
