use super::{CloudStore, StoreError, StoreKey, Versioned};
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-process store for tests and single-process clusters
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait::async_trait]
impl CloudStore for MemoryStore {
    async fn create(&self, key: &StoreKey, data: Bytes) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        entries.insert(key.clone(), Versioned { version: 0, data });
        Ok(())
    }

    async fn overwrite(&self, key: &StoreKey, data: Bytes) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        entry.version += 1;
        entry.data = data;
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self.entries.lock().await.get(key).map(|e| e.data.clone()))
    }

    async fn get_versioned(&self, key: &StoreKey) -> Result<Option<Versioned>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: u64,
        data: Bytes,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if entry.version != expected {
            return Ok(false);
        }
        entry.version += 1;
        entry.data = data;
        Ok(true)
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool, StoreError> {
        Ok(self.entries.lock().await.contains_key(key))
    }

    async fn delete(&self, key: &StoreKey) -> Result<bool, StoreError> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let key = StoreKey::new("c", "a");

        store.create(&key, Bytes::from("one")).await.unwrap();
        assert!(matches!(
            store.create(&key, Bytes::from("two")).await,
            Err(StoreError::AlreadyExists(_))
        ));

        assert!(store.compare_and_swap(&key, 0, Bytes::from("two")).await.unwrap());
        assert!(!store.compare_and_swap(&key, 0, Bytes::from("three")).await.unwrap());

        let current = store.get_versioned(&key).await.unwrap().unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.data, Bytes::from("two"));

        store.overwrite(&key, Bytes::from("four")).await.unwrap();
        assert_eq!(store.get_versioned(&key).await.unwrap().unwrap().version, 2);

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.exists(&key).await.unwrap());
        assert!(matches!(
            store.overwrite(&key, Bytes::from("five")).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
