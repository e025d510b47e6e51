//! Bounded hand-off between the producer and the uploader workers.

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::emit;
use crate::error::ExportError;
use crate::metrics::events::{PartEnqueued, UploadQueueDepth};
use crate::sink::Part;

/// Create a queue holding at most `depth` parts.
pub fn part_queue(depth: usize) -> (PartQueue, PartReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        PartQueue { tx },
        PartReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer side. Dropping or closing it ends the stream of parts.
#[derive(Debug)]
pub struct PartQueue {
    tx: mpsc::Sender<Part>,
}

impl PartQueue {
    /// Enqueue a part, blocking the calling thread while the queue is full.
    ///
    /// Must be called from a blocking context, never from an async task.
    pub fn enqueue(&self, part: Part) -> Result<(), ExportError> {
        let part_number = part.part_number;
        let bytes = part.len() as u64;
        debug!(part_number, bytes, "Add part to queue");

        self.tx
            .blocking_send(part)
            .map_err(|_| ExportError::QueueClosed)?;

        emit!(PartEnqueued { bytes });
        emit!(UploadQueueDepth {
            count: self.depth()
        });
        Ok(())
    }

    /// Parts waiting to be picked up.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Signal that no more parts will follow.
    pub fn close(self) {
        drop(self.tx);
    }
}

/// Consumer side, shared by all workers.
#[derive(Debug, Clone)]
pub struct PartReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Part>>>,
}

impl PartReceiver {
    /// Next part, or `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Part> {
        self.rx.lock().await.recv().await
    }
}
