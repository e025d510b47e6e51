//! CSV row encoding.
//!
//! Rows are encoded into an in-memory batch which the producer drains into
//! the compressor once it grows past the flush size.

use csv::{Writer, WriterBuilder};

/// Initial capacity of a row batch.
const BATCH_CAPACITY: usize = 64 * 1024;

/// Encodes records into a batch of CSV bytes.
pub struct RowEncoder {
    writer: Writer<Vec<u8>>,
    delimiter: u8,
    pending: usize,
}

impl RowEncoder {
    pub fn new(delimiter: u8) -> Self {
        Self {
            writer: Self::build(delimiter),
            delimiter,
            pending: 0,
        }
    }

    fn build(delimiter: u8) -> Writer<Vec<u8>> {
        WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_writer(Vec::with_capacity(BATCH_CAPACITY))
    }

    /// Append one record to the batch.
    pub fn encode<I, T>(&mut self, record: I) -> Result<(), csv::Error>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut fields = 0;
        for field in record {
            let field = field.as_ref();
            self.pending += field.len();
            fields += 1;
            self.writer.write_field(field)?;
        }
        // One delimiter per field boundary plus the terminator.
        self.pending += fields.max(1);
        self.writer.write_record(None::<&[u8]>)
    }

    /// Approximate number of encoded bytes not yet taken.
    ///
    /// Quoting can make the real batch slightly larger.
    pub fn pending_len(&self) -> usize {
        self.pending
    }

    /// Drain the encoded batch.
    pub fn take(&mut self) -> Result<Vec<u8>, csv::Error> {
        let writer = std::mem::replace(&mut self.writer, Self::build(self.delimiter));
        self.pending = 0;
        writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}
