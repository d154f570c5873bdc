use crate::store::{decode, encode, DataStore, StoreError, StoreKey};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

#[derive(Debug, Serialize, Deserialize)]
struct SequenceHeader {
    len: usize,
    chunk_size: usize,
}

/// Immutable ordered collection, stored as a header plus fixed-size chunks
/// so elements can be read without materializing the whole collection.
#[derive(Serialize, Deserialize)]
#[serde(bound = "", try_from = "SequenceHandle")]
pub struct CloudSequence<T> {
    key: StoreKey,
    len: usize,
    chunk_size: usize,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

/// Wire form of a handle, checked before it becomes a `CloudSequence`
#[derive(Deserialize)]
struct SequenceHandle {
    key: StoreKey,
    len: usize,
    chunk_size: usize,
}

impl<T> TryFrom<SequenceHandle> for CloudSequence<T> {
    type Error = String;

    fn try_from(handle: SequenceHandle) -> Result<Self, Self::Error> {
        if handle.chunk_size == 0 {
            return Err(format!("sequence {} has a zero chunk size", handle.key));
        }
        Ok(Self::from_parts(handle.key, handle.len, handle.chunk_size))
    }
}

impl<T> CloudSequence<T> {
    fn from_parts(key: StoreKey, len: usize, chunk_size: usize) -> Self {
        Self {
            key,
            len,
            chunk_size,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.len.div_ceil(self.chunk_size.max(1))
    }

    fn chunk_key(&self, chunk: usize) -> StoreKey {
        chunk_key(&self.key, chunk)
    }
}

fn chunk_key(key: &StoreKey, chunk: usize) -> StoreKey {
    key.child(&format!("chunk-{:06}", chunk))
}

impl<T> CloudSequence<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Persist `items` under a fresh name
    pub async fn new(store: &DataStore, items: &[T]) -> Result<Self, StoreError> {
        let key = store.fresh_key();
        let chunk_size = store.sequence_chunk_size();

        for (index, chunk) in items.chunks(chunk_size).enumerate() {
            store
                .create_immutable(&chunk_key(&key, index), encode(chunk)?)
                .await?;
        }

        let header = SequenceHeader {
            len: items.len(),
            chunk_size,
        };
        store.create_immutable(&key, encode(&header)?).await?;

        tracing::debug!(key = %key, len = items.len(), "created sequence");
        Ok(Self::from_parts(key, items.len(), chunk_size))
    }

    /// Rebuild a handle from a sequence name
    pub async fn parse(store: &DataStore, name: &str) -> Result<Self, StoreError> {
        let key = store.key(name);
        let header: SequenceHeader = decode(&store.get_immutable(&key).await?)?;
        if header.chunk_size == 0 {
            return Err(StoreError::Backend(format!(
                "sequence {} has a zero chunk size",
                key
            )));
        }
        Ok(Self::from_parts(key, header.len, header.chunk_size))
    }

    async fn read_chunk(&self, store: &DataStore, chunk: usize) -> Result<Vec<T>, StoreError> {
        let data = store.get_immutable(&self.chunk_key(chunk)).await?;
        decode(&data)
    }

    /// Element at `index`, reading only the chunk that holds it
    pub async fn get(&self, store: &DataStore, index: usize) -> Result<T, StoreError> {
        if index >= self.len {
            return Err(StoreError::NotFound(format!("{}[{}]", self.key, index)));
        }
        let chunk = index / self.chunk_size;
        let mut items = self.read_chunk(store, chunk).await?;
        let offset = index % self.chunk_size;
        if offset >= items.len() {
            return Err(StoreError::Backend(format!(
                "chunk {} of {} is shorter than expected",
                chunk, self.key
            )));
        }
        Ok(items.swap_remove(offset))
    }

    /// Lazily stream the elements in order, one chunk fetch at a time
    pub fn enumerate<'a>(
        &'a self,
        store: &'a DataStore,
    ) -> impl Stream<Item = Result<T, StoreError>> + Send + 'a
    where
        T: 'a,
    {
        stream::iter(0..self.chunk_count())
            .then(move |chunk| self.read_chunk(store, chunk))
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<T, StoreError>)))
            .try_flatten()
    }

    pub async fn to_vec(&self, store: &DataStore) -> Result<Vec<T>, StoreError> {
        self.enumerate(store).try_collect().await
    }
}

impl<T> Clone for CloudSequence<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.key.clone(), self.len, self.chunk_size)
    }
}

impl<T> PartialEq for CloudSequence<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.len == other.len && self.chunk_size == other.chunk_size
    }
}

impl<T> std::fmt::Debug for CloudSequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSequence")
            .field("key", &self.key)
            .field("len", &self.len)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}
