//! In-memory storage backend.
//!
//! Backed by `object_store::memory::InMemory`, which supports multipart
//! uploads. Used for embedding and tests.

use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::multipart::MultipartStore;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MissingKeySnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// In-memory store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) fn construct_memory(config: MemoryConfig) -> Result<Self, StorageError> {
        let path = config.key.clone().context(MissingKeySnafu {
            url: "memory://".to_string(),
        })?;
        let canonical_url = format!("memory://{path}");

        let store = Arc::new(InMemory::new());
        let multipart_store: Option<Arc<dyn MultipartStore>> = Some(store.clone());
        let object_store: Arc<dyn ObjectStore> = store;

        Ok(Self {
            config: BackendConfig::Memory(config),
            object_store,
            multipart_store,
            canonical_url,
            storage_options: HashMap::new(),
            path,
        })
    }
}
