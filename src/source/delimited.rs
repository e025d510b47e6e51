//! Delimited text source.
//!
//! Reads CSV-like input from a file or stdin with the `csv` crate. Files
//! ending in `.gz` are decompressed on the fly.

use csv::{Reader, ReaderBuilder, StringRecord};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::debug;

use super::{Record, RecordSource, SourceError};

/// Record source over delimited text.
pub struct DelimitedSource {
    reader: Reader<Box<dyn Read + Send>>,
    has_headers: bool,
    record: StringRecord,
    /// First record, read early to size generated column names.
    peeked: Option<Record>,
}

impl DelimitedSource {
    /// Open `path`, or stdin when `path` is "-".
    pub fn open(
        path: impl AsRef<Path>,
        delimiter: u8,
        has_headers: bool,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let input: Box<dyn Read + Send> = if path == Path::new("-") {
            debug!("Reading records from stdin");
            Box::new(io::stdin())
        } else {
            let file = BufReader::new(File::open(path)?);
            if path.extension().is_some_and(|ext| ext == "gz") {
                debug!(path = %path.display(), "Reading gzip-compressed records");
                Box::new(MultiGzDecoder::new(file))
            } else {
                debug!(path = %path.display(), "Reading records");
                Box::new(file)
            }
        };
        Ok(Self::from_reader(input, delimiter, has_headers))
    }

    pub fn from_reader<R: Read + Send + 'static>(
        input: R,
        delimiter: u8,
        has_headers: bool,
    ) -> Self {
        let input: Box<dyn Read + Send> = Box::new(input);
        let reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(has_headers)
            .from_reader(input);

        Self {
            reader,
            has_headers,
            record: StringRecord::new(),
            peeked: None,
        }
    }

    fn read(&mut self) -> Result<Option<Record>, SourceError> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        Ok(Some(self.record.iter().map(String::from).collect()))
    }
}

impl RecordSource for DelimitedSource {
    fn columns(&mut self) -> Result<Vec<String>, SourceError> {
        if self.has_headers {
            return Ok(self.reader.headers()?.iter().map(String::from).collect());
        }

        // Without a header row, name columns by position.
        if self.peeked.is_none() {
            self.peeked = self.read()?;
        }
        let width = self.peeked.as_ref().map_or(0, Vec::len);
        Ok((1..=width).map(|i| format!("column_{i}")).collect())
    }

    fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        match self.peeked.take() {
            Some(record) => Ok(Some(record)),
            None => self.read(),
        }
    }
}
