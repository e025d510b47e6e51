//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::sync::Mutex;
use std::time::Duration;

use squall::MemorySource;
use squall::error::StorageError;
use squall::sink::PartPolicy;
use squall::storage::{CompletedPart, MultipartTarget, PartETag, UploadId};

pub const KIB: usize = 1024;

/// Small parts so a few thousand rows span several of them.
pub fn small_policy() -> PartPolicy {
    PartPolicy {
        part_size: 16 * KIB,
        min_part_size: 16 * KIB,
        max_parts: 10_000,
    }
}

pub fn columns() -> Vec<String> {
    vec!["id".to_string(), "name".to_string(), "amount".to_string()]
}

pub fn rows(count: usize) -> Vec<Vec<String>> {
    (0..count)
        .map(|i| {
            vec![
                i.to_string(),
                format!("customer-{}", i % 97),
                format!("{}.{:02}", i * 7 % 1000, i % 100),
            ]
        })
        .collect()
}

pub fn source(count: usize) -> MemorySource {
    MemorySource::new(columns(), rows(count))
}

/// The CSV text `source(count)` encodes to.
pub fn expected_csv(count: usize) -> String {
    let mut out = columns().join(",");
    out.push('\n');
    for row in rows(count) {
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

pub fn gunzip(bytes: &[u8]) -> String {
    let mut out = String::new();
    GzDecoder::new(bytes).read_to_string(&mut out).unwrap();
    out
}

/// Every call a [`ScriptedTarget`] received.
#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub initiated: usize,
    /// Uploaded parts by number.
    pub parts: BTreeMap<u32, Bytes>,
    /// Part numbers passed to each completion call, in the order given.
    pub completed: Vec<Vec<u32>>,
    pub aborted: usize,
    pub puts: Vec<Bytes>,
}

type Delay = Box<dyn Fn(u32) -> Duration + Send + Sync>;

/// Multipart target with scripted failures.
#[derive(Default)]
pub struct ScriptedTarget {
    fail_initiate: bool,
    fail_part: Option<u32>,
    fail_complete: bool,
    fail_abort: bool,
    delay: Option<Delay>,
    calls: Mutex<Calls>,
}

fn remote_error(message: &str) -> StorageError {
    StorageError::Io {
        source: io::Error::other(message.to_string()),
    }
}

impl ScriptedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_initiate(mut self) -> Self {
        self.fail_initiate = true;
        self
    }

    pub fn fail_part(mut self, part_number: u32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// Sleep before answering each part upload.
    pub fn with_part_delay(mut self, delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    /// Completed object: uploaded parts joined in part-number order.
    pub fn assembled(&self) -> Vec<u8> {
        let calls = self.calls();
        calls
            .parts
            .values()
            .flat_map(|payload| payload.iter().copied())
            .collect()
    }
}

#[async_trait]
impl MultipartTarget for ScriptedTarget {
    async fn initiate_multipart(&self) -> Result<UploadId, StorageError> {
        self.calls.lock().unwrap().initiated += 1;
        if self.fail_initiate {
            return Err(remote_error("initiate refused"));
        }
        Ok(UploadId("upload-1".to_string()))
    }

    async fn upload_part(
        &self,
        _upload_id: &UploadId,
        part_number: u32,
        payload: Bytes,
    ) -> Result<PartETag, StorageError> {
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(part_number)).await;
        }
        if self.fail_part == Some(part_number) {
            return Err(remote_error("connection reset"));
        }
        self.calls
            .lock()
            .unwrap()
            .parts
            .insert(part_number, payload);
        Ok(PartETag(format!("etag-{part_number}")))
    }

    async fn complete_multipart(
        &self,
        _upload_id: &UploadId,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StorageError> {
        let numbers = parts.iter().map(|p| p.part_number).collect();
        self.calls.lock().unwrap().completed.push(numbers);
        if self.fail_complete {
            return Err(remote_error("completion rejected"));
        }
        Ok("scripted://bucket/out.csv.gz".to_string())
    }

    async fn abort_multipart(&self, _upload_id: &UploadId) -> Result<(), StorageError> {
        self.calls.lock().unwrap().aborted += 1;
        if self.fail_abort {
            return Err(remote_error("abort timed out"));
        }
        Ok(())
    }

    async fn put_object(&self, payload: Bytes) -> Result<(), StorageError> {
        self.calls.lock().unwrap().puts.push(payload);
        Ok(())
    }
}
