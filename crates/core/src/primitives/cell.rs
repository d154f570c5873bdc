use crate::store::{decode, encode, DataStore, StoreError, StoreKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Immutable reference to a single stored value
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CloudCell<T> {
    key: StoreKey,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> CloudCell<T> {
    fn from_key(key: StoreKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Reinterpret the referent as another type
    pub fn cast<U>(self) -> CloudCell<U> {
        CloudCell::from_key(self.key)
    }
}

impl<T> CloudCell<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Store `value` under a fresh name
    pub async fn new(store: &DataStore, value: &T) -> Result<Self, StoreError> {
        Self::write(store, store.fresh_key(), value).await
    }

    /// Store `value` under a caller-chosen name. Fails if the name is taken.
    pub async fn new_named(store: &DataStore, name: &str, value: &T) -> Result<Self, StoreError> {
        Self::write(store, store.key(name), value).await
    }

    async fn write(store: &DataStore, key: StoreKey, value: &T) -> Result<Self, StoreError> {
        store.create_immutable(&key, encode(value)?).await?;
        tracing::debug!(key = %key, "created cell");
        Ok(Self::from_key(key))
    }

    /// Rebuild a handle for an existing cell
    pub async fn parse(store: &DataStore, name: &str) -> Result<Self, StoreError> {
        let key = store.key(name);
        if !store.backend().exists(&key).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(Self::from_key(key))
    }

    /// Fetch the value, served from the worker's cache when possible
    pub async fn value(&self, store: &DataStore) -> Result<T, StoreError> {
        let data = store.get_immutable(&self.key).await?;
        decode(&data)
    }
}

impl<T> Clone for CloudCell<T> {
    fn clone(&self) -> Self {
        Self::from_key(self.key.clone())
    }
}

impl<T> PartialEq for CloudCell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> std::fmt::Debug for CloudCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCell").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        values: Vec<f64>,
    }

    fn store() -> DataStore {
        DataStore::new(Arc::new(MemoryStore::new()), "cells")
    }

    #[tokio::test]
    async fn test_cell_value_matches_stored_value() {
        let store = store();
        let reading = Reading {
            sensor: "t-1".to_string(),
            values: vec![20.5, 21.0],
        };

        let cell = CloudCell::new(&store, &reading).await.unwrap();
        assert_eq!(cell.value(&store).await.unwrap(), reading);

        // A different worker with a cold cache sees the same value
        assert_eq!(cell.value(&store.detached()).await.unwrap(), reading);
    }

    #[tokio::test]
    async fn test_named_cell_parse() {
        let store = store();
        CloudCell::new_named(&store, "config", &json!({"retries": 3}))
            .await
            .unwrap();

        let parsed: CloudCell<serde_json::Value> = CloudCell::parse(&store, "config").await.unwrap();
        assert_eq!(parsed.value(&store).await.unwrap(), json!({"retries": 3}));

        assert!(matches!(
            CloudCell::<serde_json::Value>::parse(&store, "missing").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            CloudCell::new_named(&store, "config", &json!(1)).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_handle_serializes_as_key() {
        let cell: CloudCell<u32> = CloudCell::from_key(StoreKey::new("cells", "abc"));
        let value = serde_json::to_value(&cell).unwrap();
        assert_eq!(value, json!({"key": {"container": "cells", "name": "abc"}}));

        let back: CloudCell<u32> = serde_json::from_value(value).unwrap();
        assert_eq!(back, cell);
    }
}
