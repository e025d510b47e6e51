//! Export pipeline.
//!
//! Connects the record source, the gzip stage, the part sizer and the
//! uploader pool into one streaming run with backpressure and cancellation.
//!
//! # Architecture
//!
//! Uses a producer-consumer pattern to separate CPU work from I/O:
//! - **Tokio's blocking thread pool**: a single producer reads records,
//!   encodes CSV, compresses and cuts parts (CPU bound)
//! - **Tokio tasks**: a fixed pool of uploaders sends parts concurrently
//!   (I/O bound)
//!
//! The two sides meet at a bounded queue. The [`MultipartSession`] decides
//! whether the remote object is completed or aborted, and only after every
//! uploader has returned.

mod cancel;
mod producer;
mod queue;
mod session;
mod signal;
mod tasks;

use snafu::prelude::*;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, KB, MB, delimiter_byte};
use crate::emit;
use crate::error::{
    ConfigError, ConfigSnafu, DirectPutSnafu, ExportError, InvalidCompressionLevelSnafu,
    IoSnafu, PartSizeTooSmallSnafu, SizeOverflowSnafu, StorageSnafu, TaskJoinSnafu,
    ZeroValueSnafu,
};
use crate::metrics::events::DirectPutCompleted;
use crate::sink::PartPolicy;
use crate::source::{Record, RecordSource};
use crate::storage::{BackendConfig, MultipartTarget, StorageProvider};

pub use cancel::{CancelReason, Cancellation};
pub use session::{MultipartSession, PartOutcome, SessionState};
pub use signal::{shutdown_signal, spawn_signal_handler};

use producer::{DirectSink, PartitionedOutput, PartitionedSink, produce};
use queue::part_queue;
use tasks::UploaderPool;

/// Hook applied to every record before encoding.
///
/// Receives the record and the source column names. Returning `None` skips
/// the record.
pub type RowProcessor = Arc<dyn Fn(Record, &[String]) -> Option<Record> + Send + Sync>;

/// Resolved settings for one export run.
#[derive(Clone)]
pub struct ExportOptions {
    /// Output field delimiter.
    pub delimiter: u8,
    /// Whether a header row is written first.
    pub write_headers: bool,
    /// Header names to write instead of the source column names.
    pub headers: Option<Vec<String>>,
    /// Gzip level, 0-9.
    pub compression_level: u32,
    /// Uncompressed bytes buffered before the compressor is flushed.
    pub flush_size: usize,
    pub part_policy: PartPolicy,
    /// Concurrent part uploads.
    pub workers: usize,
    /// Parts buffered between the producer and the uploaders.
    pub queue_depth: usize,
    pub row_processor: Option<RowProcessor>,
}

impl fmt::Debug for ExportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOptions")
            .field("delimiter", &(self.delimiter as char))
            .field("write_headers", &self.write_headers)
            .field("headers", &self.headers)
            .field("compression_level", &self.compression_level)
            .field("flush_size", &self.flush_size)
            .field("part_policy", &self.part_policy)
            .field("workers", &self.workers)
            .field("queue_depth", &self.queue_depth)
            .field("row_processor", &self.row_processor.is_some())
            .finish()
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            write_headers: true,
            headers: None,
            compression_level: 6,
            flush_size: MB,
            part_policy: PartPolicy::default(),
            workers: 4,
            queue_depth: 4,
            row_processor: None,
        }
    }
}

fn to_bytes(field: &'static str, value: usize, unit: usize) -> Result<usize, ConfigError> {
    value
        .checked_mul(unit)
        .context(SizeOverflowSnafu { field, value })
}

impl ExportOptions {
    /// Resolve and validate the options described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let options = Self {
            delimiter: delimiter_byte(config.csv.delimiter)?,
            write_headers: config.csv.write_headers,
            headers: config.csv.headers.clone(),
            compression_level: config.compression.level,
            flush_size: to_bytes("flush_size_kb", config.compression.flush_size_kb, KB)?,
            part_policy: PartPolicy {
                part_size: to_bytes("part_size_mb", config.upload.part_size_mb, MB)?,
                min_part_size: to_bytes(
                    "min_part_size_mb",
                    config.upload.min_part_size_mb,
                    MB,
                )?,
                max_parts: config.upload.max_parts,
            },
            workers: config.upload.workers,
            queue_depth: config.upload.effective_queue_depth(),
            row_processor: None,
        };
        options.validate()?;
        Ok(options)
    }

    /// Check the options before any remote call is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.part_policy;
        ensure!(policy.part_size > 0, ZeroValueSnafu { field: "part_size" });
        ensure!(self.workers > 0, ZeroValueSnafu { field: "workers" });
        ensure!(
            self.queue_depth > 0,
            ZeroValueSnafu {
                field: "queue_depth"
            }
        );
        ensure!(policy.max_parts > 0, ZeroValueSnafu { field: "max_parts" });
        ensure!(
            self.flush_size > 0,
            ZeroValueSnafu {
                field: "flush_size"
            }
        );
        ensure!(
            policy.part_size >= policy.min_part_size,
            PartSizeTooSmallSnafu {
                part_size: policy.part_size,
                min_part_size: policy.min_part_size,
            }
        );
        ensure!(
            self.compression_level <= 9,
            InvalidCompressionLevelSnafu {
                level: self.compression_level
            }
        );
        Ok(())
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.write_headers = false;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_flush_size(mut self, bytes: usize) -> Self {
        self.flush_size = bytes;
        self
    }

    pub fn with_part_policy(mut self, policy: PartPolicy) -> Self {
        self.part_policy = policy;
        self
    }

    /// Set the worker count. The queue depth follows it.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self.queue_depth = workers;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_row_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(Record, &[String]) -> Option<Record> + Send + Sync + 'static,
    {
        self.row_processor = Some(Arc::new(processor));
        self
    }
}

/// How the output reached its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Multipart upload completed.
    Completed { location: String },
    /// Output stayed below one part and was sent with a single put.
    DirectPut,
    /// Written straight to a local sink.
    Written,
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportOutcome::Completed { location } => write!(f, "multipart upload to {location}"),
            ExportOutcome::DirectPut => f.write_str("single-request upload"),
            ExportOutcome::Written => f.write_str("direct write"),
        }
    }
}

/// Statistics about a finished export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStats {
    /// Data rows written, excluding the header and skipped rows.
    pub rows: u64,
    /// Multipart parts uploaded.
    pub parts: u32,
    pub compressed_bytes: u64,
    pub outcome: ExportOutcome,
}

/// Runs exports with one set of options and one cancellation signal.
#[derive(Debug, Clone)]
pub struct Exporter {
    options: ExportOptions,
    cancel: Cancellation,
}

impl Exporter {
    pub fn new(options: ExportOptions) -> Self {
        Self::with_cancellation(options, Cancellation::new())
    }

    /// Use an existing cancellation, e.g. one wired to a signal handler.
    pub fn with_cancellation(options: ExportOptions, cancel: Cancellation) -> Self {
        Self { options, cancel }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Stream `source` into a multipart upload on `target`.
    ///
    /// The upload is initiated before any record is read. On success it is
    /// completed, or, if the output never reached one part, aborted and
    /// replaced by a single put. On any failure or interrupt it is aborted
    /// once every uploader has stopped.
    pub async fn upload<S>(
        &self,
        mut source: S,
        target: Arc<dyn MultipartTarget>,
    ) -> Result<ExportStats, ExportError>
    where
        S: RecordSource + 'static,
    {
        self.options.validate().context(ConfigSnafu)?;

        let session = Arc::new(MultipartSession::new(target.clone()));
        session.initiate().await?;

        let (queue, receiver) = part_queue(self.options.queue_depth);
        let pool = UploaderPool::spawn(
            self.options.workers,
            receiver,
            session.clone(),
            self.cancel.clone(),
        );

        let producer = {
            let options = self.options.clone();
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || {
                let mut sink = PartitionedSink::new(&options, queue);
                let result = match produce(&mut source, &options, &cancel, &mut sink) {
                    Ok(rows) => sink.finish().map(|output| (rows, output)),
                    Err(e) => {
                        // Dropping the sink closes the queue.
                        drop(sink);
                        Err(e)
                    }
                };
                match &result {
                    Err(e) if !e.is_consequence() => {
                        error!(error = %e, "Producer failed");
                        cancel.cancel(CancelReason::ProducerFailed);
                    }
                    _ => {}
                }
                result
            })
        };

        let mut errors = Vec::new();
        let produced = match producer.await {
            Ok(Ok(produced)) => Some(produced),
            Ok(Err(e)) => {
                errors.push(e);
                None
            }
            Err(source) => {
                self.cancel.cancel(CancelReason::ProducerFailed);
                errors.push(ExportError::TaskJoin { source });
                None
            }
        };

        debug!("Producer finished, waiting for uploads");
        for result in pool.finish().await {
            match result {
                Ok(stats) => debug!(parts = stats.parts, bytes = stats.bytes, "Uploader done"),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() && self.cancel.is_cancelled() {
            errors.push(match self.cancel.reason() {
                Some(CancelReason::Interrupted) => ExportError::Interrupted,
                _ => ExportError::Cancelled,
            });
        }

        match produced {
            Some((rows, output)) if errors.is_empty() => {
                match self.finalize(&session, target.as_ref(), rows, output).await {
                    Ok(stats) => return Ok(stats),
                    Err(e) => errors.push(e),
                }
            }
            _ => {}
        }

        Err(self.fail(&session, errors).await)
    }

    /// Complete the session, or fall back to a single put for small output.
    async fn finalize(
        &self,
        session: &MultipartSession,
        target: &dyn MultipartTarget,
        rows: u64,
        output: PartitionedOutput,
    ) -> Result<ExportStats, ExportError> {
        let PartitionedOutput {
            parts,
            unpartitioned,
            compressed_bytes,
        } = output;

        let outcome = match unpartitioned {
            Some(payload) => {
                session.abort("output below part threshold").await?;
                let bytes = payload.len() as u64;
                target.put_object(payload).await.context(DirectPutSnafu)?;
                emit!(DirectPutCompleted { bytes });
                info!(bytes, "Output below part threshold, uploaded in a single request");
                ExportOutcome::DirectPut
            }
            None => {
                let location = session.complete(parts).await?;
                info!(location = %location, parts, "Completed multipart upload");
                ExportOutcome::Completed { location }
            }
        };

        info!(rows, parts, compressed_bytes, "Export complete");
        Ok(ExportStats {
            rows,
            parts,
            compressed_bytes,
            outcome,
        })
    }

    /// Pick the error to report, log the rest and abort the session.
    ///
    /// A failed abort replaces the reported error.
    async fn fail(&self, session: &MultipartSession, mut errors: Vec<ExportError>) -> ExportError {
        let primary = self.primary_error(&mut errors);
        for other in &errors {
            if other.is_consequence() {
                debug!(error = %other, "Stage stopped after cancellation");
            } else {
                warn!(error = %other, "Additional error during export");
            }
        }

        if matches!(primary, ExportError::Abort { .. }) {
            return primary;
        }

        error!(error = %primary, "Export failed, aborting multipart upload");
        match session.abort(&primary.to_string()).await {
            Ok(()) => primary,
            Err(abort_error) => abort_error,
        }
    }

    /// The error matching the first cancellation reason.
    fn primary_error(&self, errors: &mut Vec<ExportError>) -> ExportError {
        let index = match self.cancel.reason() {
            Some(CancelReason::Interrupted) => return ExportError::Interrupted,
            Some(CancelReason::UploadFailed { part_number }) => errors
                .iter()
                .position(|e| e.failed_part() == Some(part_number)),
            Some(CancelReason::ProducerFailed) | None => None,
        }
        .or_else(|| errors.iter().position(|e| !e.is_consequence()));

        match index {
            Some(i) => errors.remove(i),
            None if !errors.is_empty() => errors.remove(0),
            None => ExportError::Cancelled,
        }
    }

    /// Stream `source` as one gzip file into `sink`.
    ///
    /// No parts and no remote session are involved. Returns the writer once
    /// the gzip trailer has been written and flushed.
    pub async fn write_to<S, W>(&self, mut source: S, sink: W) -> Result<(ExportStats, W), ExportError>
    where
        S: RecordSource + 'static,
        W: Write + Send + 'static,
    {
        self.options.validate().context(ConfigSnafu)?;

        let options = self.options.clone();
        let cancel = self.cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut sink = DirectSink::new(sink, options.compression_level);
            let rows = produce(&mut source, &options, &cancel, &mut sink)?;
            let (writer, compressed_bytes) = sink.finish()?;
            Ok::<_, ExportError>((rows, writer, compressed_bytes))
        })
        .await
        .context(TaskJoinSnafu)?;

        match result {
            Ok((rows, writer, compressed_bytes)) => {
                info!(rows, compressed_bytes, "Export complete");
                let stats = ExportStats {
                    rows,
                    parts: 0,
                    compressed_bytes,
                    outcome: ExportOutcome::Written,
                };
                Ok((stats, writer))
            }
            Err(e)
                if e.is_consequence()
                    && self.cancel.reason() == Some(CancelReason::Interrupted) =>
            {
                Err(ExportError::Interrupted)
            }
            Err(e) => Err(e),
        }
    }

    /// Stream `source` into a gzip file at `path`.
    ///
    /// Parent directories are created. A partial file is removed on failure.
    pub async fn write_file<S>(&self, source: S, path: &Path) -> Result<ExportStats, ExportError>
    where
        S: RecordSource + 'static,
    {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(IoSnafu)
                .context(StorageSnafu)?;
        }
        let file = File::create(path).context(IoSnafu).context(StorageSnafu)?;
        info!(path = %path.display(), "Writing export to local file");

        let result = match self.write_to(source, BufWriter::new(file)).await {
            Ok((stats, writer)) => sync_file(writer).map(|()| stats),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove partial export file");
            }
        }
        result
    }
}

fn sync_file(writer: BufWriter<File>) -> Result<(), ExportError> {
    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context(IoSnafu)
        .context(StorageSnafu)?;
    file.sync_all().context(IoSnafu).context(StorageSnafu)
}

/// Resolve a destination, treating relative paths as local files.
pub fn resolve_destination(destination: &str) -> Result<BackendConfig, ExportError> {
    let is_relative_path = !destination.contains("://")
        && !destination.starts_with("file:")
        && !destination.starts_with('/');
    if is_relative_path {
        let cwd = std::env::current_dir()
            .context(IoSnafu)
            .context(StorageSnafu)?;
        let absolute: PathBuf = cwd.join(destination);
        return BackendConfig::parse_url(&absolute.to_string_lossy()).context(StorageSnafu);
    }
    BackendConfig::parse_url(destination).context(StorageSnafu)
}

/// Run one export as described by `config`.
///
/// Local destinations are written directly; object-store destinations use
/// the multipart pipeline.
pub async fn run_export<S>(
    config: &Config,
    source: S,
    cancel: Cancellation,
) -> Result<ExportStats, ExportError>
where
    S: RecordSource + 'static,
{
    let options = ExportOptions::from_config(config).context(ConfigSnafu)?;
    let exporter = Exporter::with_cancellation(options, cancel);

    let backend = resolve_destination(&config.destination.path)?;
    if let Some(path) = backend.local_file() {
        return exporter.write_file(source, &path).await;
    }

    let provider = StorageProvider::for_url_with_options(
        &config.destination.path,
        config.destination.storage_options.clone(),
    )
    .await
    .context(StorageSnafu)?;
    info!(
        destination = provider.url(),
        backend = backend.backend_name(),
        "Exporting to object store"
    );

    exporter.upload(source, Arc::new(provider)).await
}
