//! Background tasks of the export pipeline.
//!
//! The uploader pool runs on the async runtime and does all network I/O,
//! while the producer runs on tokio's blocking thread pool.

mod upload;

pub(super) use upload::UploaderPool;
