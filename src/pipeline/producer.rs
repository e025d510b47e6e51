//! The single producing path: read, encode, compress, size, enqueue.
//!
//! Runs synchronously on a blocking thread. Rows are encoded into a CSV
//! batch; each time the batch reaches the flush size it is compressed and
//! the compressor is flushed, which hands one segment to the output.

use bytes::Bytes;
use snafu::prelude::*;
use std::io::{self, Write};
use tracing::debug;

use super::ExportOptions;
use super::cancel::Cancellation;
use super::queue::PartQueue;
use crate::emit;
use crate::error::{CompressionSnafu, EncodeSnafu, ExportError, SourceSnafu};
use crate::metrics::events::{BytesUncompressed, RowsExported, SegmentFlushed};
use crate::sink::{CompressedSegment, Compressor, PartSizer, RowEncoder, SegmentCompressor};
use crate::source::RecordSource;

/// Destination for encoded CSV batches.
pub(crate) trait BatchSink {
    /// Compress a batch and flush it downstream.
    fn write_batch(&mut self, batch: &[u8]) -> Result<(), ExportError>;
}

/// Pull every record from `source` into `sink`.
///
/// Checks for cancellation before each record. Returns the number of rows
/// written, excluding the header and rows skipped by the row processor.
pub(crate) fn produce<S, B>(
    source: &mut S,
    options: &ExportOptions,
    cancel: &Cancellation,
    sink: &mut B,
) -> Result<u64, ExportError>
where
    S: RecordSource + ?Sized,
    B: BatchSink,
{
    let mut encoder = RowEncoder::new(options.delimiter);
    let columns = source.columns().context(SourceSnafu)?;

    if options.write_headers {
        let headers = options.headers.as_ref().unwrap_or(&columns);
        encoder.encode(headers).context(EncodeSnafu)?;
    }

    let mut rows: u64 = 0;
    let mut rows_in_batch: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(rows, "Producer stopping, export cancelled");
            return Err(ExportError::Cancelled);
        }

        let Some(record) = source.next_record().context(SourceSnafu)? else {
            break;
        };

        let record = match &options.row_processor {
            Some(process) => match process(record, columns.as_slice()) {
                Some(record) => record,
                None => continue,
            },
            None => record,
        };

        encoder.encode(&record).context(EncodeSnafu)?;
        rows += 1;
        rows_in_batch += 1;

        if encoder.pending_len() >= options.flush_size {
            flush_batch(&mut encoder, sink)?;
            emit!(RowsExported {
                count: rows_in_batch
            });
            rows_in_batch = 0;
        }
    }

    flush_batch(&mut encoder, sink)?;
    if rows_in_batch > 0 {
        emit!(RowsExported {
            count: rows_in_batch
        });
    }

    Ok(rows)
}

fn flush_batch<B: BatchSink>(encoder: &mut RowEncoder, sink: &mut B) -> Result<(), ExportError> {
    let batch = encoder.take().context(EncodeSnafu)?;
    if batch.is_empty() {
        return Ok(());
    }
    emit!(BytesUncompressed {
        bytes: batch.len() as u64
    });
    sink.write_batch(&batch)
}

/// Result of the partitioned output once the stream is finished.
#[derive(Debug)]
pub(crate) struct PartitionedOutput {
    /// Parts handed to the upload queue.
    pub parts: u32,
    /// Whole output when it never reached one part.
    pub unpartitioned: Option<Bytes>,
    /// Total compressed bytes.
    pub compressed_bytes: u64,
}

/// Compresses into memory and feeds parts to the upload queue.
pub(crate) struct PartitionedSink {
    compressor: SegmentCompressor,
    sizer: PartSizer,
    queue: PartQueue,
    compressed_bytes: u64,
}

impl PartitionedSink {
    pub fn new(options: &ExportOptions, queue: PartQueue) -> Self {
        Self {
            compressor: SegmentCompressor::in_memory(options.compression_level),
            sizer: PartSizer::new(options.part_policy),
            queue,
            compressed_bytes: 0,
        }
    }

    fn route(&mut self, segment: CompressedSegment) -> Result<(), ExportError> {
        let bytes = segment.bytes.len() as u64;
        emit!(SegmentFlushed { bytes });
        self.compressed_bytes += bytes;

        for part in self.sizer.push(segment)? {
            self.queue.enqueue(part)?;
        }
        Ok(())
    }

    /// Finalize the gzip stream, enqueue the last part and close the queue.
    pub fn finish(self) -> Result<PartitionedOutput, ExportError> {
        let Self {
            compressor,
            mut sizer,
            queue,
            mut compressed_bytes,
        } = self;

        let segment = compressor.finish_segment().context(CompressionSnafu)?;
        let bytes = segment.bytes.len() as u64;
        emit!(SegmentFlushed { bytes });
        compressed_bytes += bytes;

        for part in sizer.push(segment)? {
            queue.enqueue(part)?;
        }

        let parts = sizer.parts_emitted();
        let unpartitioned = (parts == 0).then(|| sizer.take_unpartitioned());
        queue.close();

        Ok(PartitionedOutput {
            parts,
            unpartitioned,
            compressed_bytes,
        })
    }
}

impl BatchSink for PartitionedSink {
    fn write_batch(&mut self, batch: &[u8]) -> Result<(), ExportError> {
        self.compressor.write(batch).context(CompressionSnafu)?;
        let segment = self.compressor.flush_segment().context(CompressionSnafu)?;
        self.route(segment)
    }
}

/// Counts bytes passing through to the inner writer.
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compresses straight into a writer.
pub(crate) struct DirectSink<W: Write> {
    compressor: Compressor<CountingWriter<W>>,
}

impl<W: Write> DirectSink<W> {
    pub fn new(sink: W, level: u32) -> Self {
        Self {
            compressor: Compressor::new(
                CountingWriter {
                    inner: sink,
                    count: 0,
                },
                level,
            ),
        }
    }

    /// Finalize the gzip stream and flush the writer.
    ///
    /// Returns the writer and the compressed bytes written to it.
    pub fn finish(self) -> Result<(W, u64), ExportError> {
        let mut counting = self.compressor.finish().context(CompressionSnafu)?;
        counting.flush().context(CompressionSnafu)?;
        emit!(SegmentFlushed {
            bytes: counting.count
        });
        Ok((counting.inner, counting.count))
    }
}

impl<W: Write> BatchSink for DirectSink<W> {
    fn write_batch(&mut self, batch: &[u8]) -> Result<(), ExportError> {
        self.compressor.write(batch).context(CompressionSnafu)?;
        self.compressor.flush().context(CompressionSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::part_queue;
    use crate::sink::PartPolicy;
    use crate::source::MemorySource;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn decode(bytes: &[u8]) -> String {
        let mut out = String::new();
        GzDecoder::new(bytes).read_to_string(&mut out).unwrap();
        out
    }

    fn source() -> MemorySource {
        MemorySource::new(
            vec!["id".into(), "name".into()],
            vec![
                vec!["1".into(), "alice".into()],
                vec!["2".into(), "bob".into()],
                vec!["3".into(), "carol".into()],
            ],
        )
    }

    #[test]
    fn test_direct_sink_output() {
        let options = ExportOptions::default().with_flush_size(8);
        let cancel = Cancellation::new();
        let mut sink = DirectSink::new(Vec::new(), options.compression_level);

        let rows = produce(&mut source(), &options, &cancel, &mut sink).unwrap();
        let (out, compressed) = sink.finish().unwrap();

        assert_eq!(rows, 3);
        assert_eq!(compressed, out.len() as u64);
        assert_eq!(decode(&out), "id,name\n1,alice\n2,bob\n3,carol\n");
    }

    #[test]
    fn test_header_override_and_row_processor() {
        let options = ExportOptions::default()
            .with_headers(vec!["ID".into(), "NAME".into()])
            .with_row_processor(|mut row: Vec<String>, columns: &[String]| {
                assert_eq!(columns, ["id", "name"]);
                if row[0] == "2" {
                    return None;
                }
                row[1] = row[1].to_uppercase();
                Some(row)
            });
        let cancel = Cancellation::new();
        let mut sink = DirectSink::new(Vec::new(), options.compression_level);

        let rows = produce(&mut source(), &options, &cancel, &mut sink).unwrap();
        let (out, _) = sink.finish().unwrap();

        assert_eq!(rows, 2);
        assert_eq!(decode(&out), "ID,NAME\n1,ALICE\n3,CAROL\n");
    }

    #[test]
    fn test_without_headers() {
        let options = ExportOptions::default().without_headers();
        let cancel = Cancellation::new();
        let mut sink = DirectSink::new(Vec::new(), options.compression_level);

        produce(&mut source(), &options, &cancel, &mut sink).unwrap();
        let (out, _) = sink.finish().unwrap();
        assert_eq!(decode(&out), "1,alice\n2,bob\n3,carol\n");
    }

    #[test]
    fn test_cancelled_producer_stops() {
        let options = ExportOptions::default();
        let cancel = Cancellation::new();
        cancel.interrupt();
        let mut sink = DirectSink::new(Vec::new(), options.compression_level);

        let err = produce(&mut source(), &options, &cancel, &mut sink).unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
    }

    #[test]
    fn test_small_partitioned_output_is_held_back() {
        let options = ExportOptions::default();
        let cancel = Cancellation::new();
        let (queue, _receiver) = part_queue(1);
        let mut sink = PartitionedSink::new(&options, queue);

        produce(&mut source(), &options, &cancel, &mut sink).unwrap();
        let output = sink.finish().unwrap();

        assert_eq!(output.parts, 0);
        let payload = output.unpartitioned.unwrap();
        assert_eq!(payload.len() as u64, output.compressed_bytes);
        assert_eq!(decode(&payload), "id,name\n1,alice\n2,bob\n3,carol\n");
    }

    #[tokio::test]
    async fn test_partitioned_output_enqueues_parts() {
        let options = ExportOptions::default()
            .with_part_policy(PartPolicy {
                part_size: 64,
                min_part_size: 64,
                max_parts: 1_000,
            })
            .with_flush_size(16)
            .with_compression_level(0);
        let records: Vec<Vec<String>> = (0..200)
            .map(|i| vec![i.to_string(), format!("name-{i}")])
            .collect();
        let expected: String = std::iter::once("id,name\n".to_string())
            .chain(records.iter().map(|r| format!("{},{}\n", r[0], r[1])))
            .collect();
        let mut source = MemorySource::new(vec!["id".into(), "name".into()], records);

        let (queue, receiver) = part_queue(1_000);
        let output = tokio::task::spawn_blocking(move || {
            let cancel = Cancellation::new();
            let mut sink = PartitionedSink::new(&options, queue);
            produce(&mut source, &options, &cancel, &mut sink).unwrap();
            sink.finish().unwrap()
        })
        .await
        .unwrap();

        let mut payload = Vec::new();
        let mut numbers = Vec::new();
        while let Some(part) = receiver.recv().await {
            numbers.push(part.part_number);
            if !part.is_last {
                assert!(part.len() >= 64);
            }
            payload.extend_from_slice(&part.payload);
        }

        assert!(output.parts > 1);
        assert_eq!(numbers, (1..=output.parts).collect::<Vec<_>>());
        assert_eq!(payload.len() as u64, output.compressed_bytes);
        assert_eq!(decode(&payload), expected);
    }
}
