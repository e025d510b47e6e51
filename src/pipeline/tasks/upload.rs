//! Uploader worker pool.

use snafu::ResultExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::emit;
use crate::error::{ExportError, TaskJoinSnafu};
use crate::metrics::events::{ActiveUploads, PartUploadFailed, PartUploaded};
use crate::pipeline::cancel::{CancelReason, Cancellation};
use crate::pipeline::queue::PartReceiver;
use crate::pipeline::session::{MultipartSession, PartOutcome};

/// Per-worker upload totals.
#[derive(Debug, Clone, Copy, Default)]
pub(in crate::pipeline) struct WorkerStats {
    pub parts: u32,
    pub bytes: u64,
}

/// Fixed set of workers pulling parts off the upload queue.
pub(in crate::pipeline) struct UploaderPool {
    workers: JoinSet<Result<WorkerStats, ExportError>>,
}

impl UploaderPool {
    /// Spawn `count` workers sharing `receiver`.
    pub fn spawn(
        count: usize,
        receiver: PartReceiver,
        session: Arc<MultipartSession>,
        cancel: Cancellation,
    ) -> Self {
        let active = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for worker_id in 0..count {
            workers.spawn(Self::run(
                worker_id,
                receiver.clone(),
                session.clone(),
                cancel.clone(),
                active.clone(),
            ));
        }

        Self { workers }
    }

    /// Wait for every worker to return.
    pub async fn finish(mut self) -> Vec<Result<WorkerStats, ExportError>> {
        let mut results = Vec::with_capacity(self.workers.len());
        while let Some(joined) = self.workers.join_next().await {
            results.push(joined.context(TaskJoinSnafu).and_then(|result| result));
        }
        emit!(ActiveUploads { count: 0 });
        results
    }

    /// Worker loop: take a part, upload it, repeat until the queue is
    /// closed and drained or the export is cancelled.
    ///
    /// A part upload already in flight always runs to completion.
    async fn run(
        worker_id: usize,
        receiver: PartReceiver,
        session: Arc<MultipartSession>,
        cancel: Cancellation,
        active: Arc<AtomicUsize>,
    ) -> Result<WorkerStats, ExportError> {
        let mut stats = WorkerStats::default();

        loop {
            let part = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(worker = worker_id, "Uploader stopping, export cancelled");
                    break;
                }

                part = receiver.recv() => match part {
                    Some(part) => part,
                    None => break,
                },
            };

            let part_number = part.part_number;
            let bytes = part.len() as u64;

            let count = active.fetch_add(1, Ordering::Relaxed) + 1;
            emit!(ActiveUploads { count });
            let start = Instant::now();

            let result = session.upload_part(part).await;

            let count = active.fetch_sub(1, Ordering::Relaxed) - 1;
            emit!(ActiveUploads { count });

            match result {
                Ok(PartOutcome::Recorded) => {
                    debug!(worker = worker_id, part_number, bytes, "Uploaded part");
                    emit!(PartUploaded {
                        bytes,
                        duration: start.elapsed(),
                    });
                    stats.parts += 1;
                    stats.bytes += bytes;
                }
                Ok(PartOutcome::Discarded) => {
                    debug!(worker = worker_id, part_number, "Session aborting, part discarded");
                }
                Err(source) => {
                    error!(worker = worker_id, part_number, error = %source, "Part upload failed");
                    emit!(PartUploadFailed);
                    session.begin_abort();
                    cancel.cancel(CancelReason::UploadFailed { part_number });
                    return Err(ExportError::UploadPart {
                        part_number,
                        source,
                    });
                }
            }
        }

        Ok(stats)
    }
}
