//! Shared cancellation for one export run.
//!
//! Any stage can cancel: the producer on its own failure, a worker on a
//! failed part upload, or the signal handler on interrupt. Only the first
//! reason is kept; later calls have no effect beyond returning `false`.

use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why an export was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The producer hit a source, encoding, compression or policy error.
    ProducerFailed,
    /// An uploader worker failed to upload a part.
    UploadFailed { part_number: u32 },
    /// A termination signal was received.
    Interrupted,
}

/// Cloneable, idempotent cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with `reason`. Returns true only for the call that set the reason.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    /// Cancel because of an external interrupt.
    pub fn interrupt(&self) -> bool {
        self.cancel(CancelReason::Interrupted)
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The first recorded reason, if cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let cancel = Cancellation::new();
        assert!(!cancel.is_cancelled());
        assert_eq!(cancel.reason(), None);

        assert!(cancel.cancel(CancelReason::UploadFailed { part_number: 3 }));
        assert!(!cancel.interrupt());
        assert!(!cancel.cancel(CancelReason::ProducerFailed));

        assert!(cancel.is_cancelled());
        assert_eq!(
            cancel.reason(),
            Some(CancelReason::UploadFailed { part_number: 3 })
        );
    }

    #[test]
    fn test_clones_share_state() {
        let cancel = Cancellation::new();
        let other = cancel.clone();
        other.interrupt();
        assert!(cancel.is_cancelled());
        assert_eq!(cancel.reason(), Some(CancelReason::Interrupted));
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let cancel = Cancellation::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        cancel.cancel(CancelReason::ProducerFailed);
        handle.await.unwrap();
    }
}
