//! squall: A library for streaming query results into gzip-compressed CSV
//! objects.
//!
//! This library provides components for encoding records as CSV, compressing
//! them in flushable segments, cutting the compressed stream into multipart
//! upload parts, and delivering those parts concurrently to an object store
//! with all-or-nothing completion.
//!
//! # Example
//!
//! ```ignore
//! use snafu::ResultExt;
//! use squall::error::{ConfigSnafu, ExportError, SourceSnafu};
//! use squall::{Cancellation, Config, DelimitedSource, run_export};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ExportError> {
//!     let config = Config::from_file("export.yaml").context(ConfigSnafu)?;
//!     let source =
//!         DelimitedSource::open(&config.source.path, b',', true).context(SourceSnafu)?;
//!     let stats = run_export(&config, source, Cancellation::new()).await?;
//!     println!("Exported {} rows", stats.rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use pipeline::{
    CancelReason, Cancellation, ExportOptions, ExportOutcome, ExportStats, Exporter, run_export,
};
pub use source::{DelimitedSource, MemorySource, Record, RecordSource};
pub use storage::{MultipartTarget, StorageProvider};
