//! Record sources feeding the export pipeline.
//!
//! A source yields the column names once and then an ordered stream of
//! text records. Sources are synchronous; the pipeline drives them from a
//! blocking thread.

pub mod delimited;
pub mod memory;

pub use delimited::DelimitedSource;
pub use memory::MemorySource;

pub use crate::error::SourceError;

/// One row of text fields, in column order.
pub type Record = Vec<String>;

/// Ordered producer of records.
pub trait RecordSource: Send {
    /// Column names of the result set.
    fn columns(&mut self) -> Result<Vec<String>, SourceError>;

    /// Next record, or `None` at the end of the stream.
    fn next_record(&mut self) -> Result<Option<Record>, SourceError>;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn columns(&mut self) -> Result<Vec<String>, SourceError> {
        (**self).columns()
    }

    fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        (**self).next_record()
    }
}
