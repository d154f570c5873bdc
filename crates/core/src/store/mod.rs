pub mod memory;
pub mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Errors raised by store backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("transaction on {key} abandoned after {attempts} conflicting attempts")]
    TransactExhausted { key: String, attempts: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Location of an entry: `container/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    pub container: String,
    pub name: String,
}

impl StoreKey {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }

    /// Key of a sub-entry, e.g. a sequence chunk
    pub fn child(&self, suffix: &str) -> Self {
        Self {
            container: self.container.clone(),
            name: format!("{}/{}", self.name, suffix),
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Entry data tagged with a version that grows on every write
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub data: Bytes,
}

/// Key-value backend holding every distributed primitive.
///
/// Immutable primitives only use `create`/`get`; atoms rely on the version
/// counter and `compare_and_swap`, which must be atomic in the backend.
#[async_trait::async_trait]
pub trait CloudStore: Send + Sync {
    /// Store a new entry at version 0. Fails if the key is taken.
    async fn create(&self, key: &StoreKey, data: Bytes) -> Result<(), StoreError>;

    /// Replace an existing entry unconditionally, bumping its version
    async fn overwrite(&self, key: &StoreKey, data: Bytes) -> Result<(), StoreError>;

    /// Retrieve an entry's data
    async fn get(&self, key: &StoreKey) -> Result<Option<Bytes>, StoreError>;

    /// Retrieve an entry together with its version
    async fn get_versioned(&self, key: &StoreKey) -> Result<Option<Versioned>, StoreError>;

    /// Replace an entry only if its version still equals `expected`.
    /// Returns `Ok(false)` when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: u64,
        data: Bytes,
    ) -> Result<bool, StoreError>;

    /// Check if an entry exists
    async fn exists(&self, key: &StoreKey) -> Result<bool, StoreError>;

    /// Delete an entry, returning whether it existed
    async fn delete(&self, key: &StoreKey) -> Result<bool, StoreError>;
}

/// Handle through which primitives reach the store: backend, container,
/// tuning knobs and a per-worker cache for immutable entries.
#[derive(Clone)]
pub struct DataStore {
    backend: Arc<dyn CloudStore>,
    container: String,
    sequence_chunk_size: usize,
    max_transact_retries: u32,
    cache: Arc<RwLock<HashMap<StoreKey, Bytes>>>,
}

impl DataStore {
    pub fn new(backend: Arc<dyn CloudStore>, container: impl Into<String>) -> Self {
        Self {
            backend,
            container: container.into(),
            sequence_chunk_size: 1024,
            max_transact_retries: 100,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_sequence_chunk_size(mut self, size: usize) -> Self {
        self.sequence_chunk_size = size.max(1);
        self
    }

    pub fn with_max_transact_retries(mut self, retries: u32) -> Self {
        self.max_transact_retries = retries;
        self
    }

    /// Same backend and settings with an empty cache, as each worker gets
    pub fn detached(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            container: self.container.clone(),
            sequence_chunk_size: self.sequence_chunk_size,
            max_transact_retries: self.max_transact_retries,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CloudStore> {
        &self.backend
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn sequence_chunk_size(&self) -> usize {
        self.sequence_chunk_size
    }

    pub fn max_transact_retries(&self) -> u32 {
        self.max_transact_retries
    }

    /// Key under the configured container with a fresh unique name
    pub fn fresh_key(&self) -> StoreKey {
        StoreKey::new(&self.container, uuid::Uuid::new_v4().to_string())
    }

    pub fn key(&self, name: impl Into<String>) -> StoreKey {
        StoreKey::new(&self.container, name)
    }

    /// Fresh key for a mutable entry. Mutable entries live apart from the
    /// named immutable ones so a name lookup never resolves to one.
    pub fn fresh_mutable_key(&self) -> StoreKey {
        StoreKey::new(
            format!("{}#mutable", self.container),
            uuid::Uuid::new_v4().to_string(),
        )
    }

    /// Read an immutable entry, consulting the cache first
    pub async fn get_immutable(&self, key: &StoreKey) -> Result<Bytes, StoreError> {
        if let Some(data) = self.cache.read().await.get(key) {
            return Ok(data.clone());
        }

        let data = self
            .backend
            .get(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        self.cache.write().await.insert(key.clone(), data.clone());
        Ok(data)
    }

    /// Create an immutable entry and seed the cache with it
    pub async fn create_immutable(&self, key: &StoreKey, data: Bytes) -> Result<(), StoreError> {
        self.backend.create(key, data.clone()).await?;
        self.cache.write().await.insert(key.clone(), data);
        Ok(())
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("container", &self.container)
            .field("sequence_chunk_size", &self.sequence_chunk_size)
            .field("max_transact_retries", &self.max_transact_retries)
            .finish()
    }
}

/// Encode a value for storage
pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, StoreError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Decode a stored value
pub(crate) fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(data)?)
}
