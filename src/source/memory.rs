//! In-memory record source.

use std::collections::VecDeque;

use super::{Record, RecordSource, SourceError};

/// Serves a fixed set of records.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    columns: Vec<String>,
    records: VecDeque<Record>,
}

impl MemorySource {
    pub fn new(columns: Vec<String>, records: Vec<Record>) -> Self {
        Self {
            columns,
            records: records.into(),
        }
    }

    #[cfg(test)]
    fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl RecordSource for MemorySource {
    fn columns(&mut self) -> Result<Vec<String>, SourceError> {
        Ok(self.columns.clone())
    }

    fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        Ok(self.records.pop_front())
    }
}
