use crate::store::{decode, encode, DataStore, StoreError, StoreKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

/// Mutable reference to a single stored value.
///
/// Atoms are never cached: every read and write goes to the store, and
/// updates land through the store's compare-and-swap so concurrent
/// transactions from any worker apply in one total order.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CloudAtom<T> {
    key: StoreKey,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> CloudAtom<T> {
    fn from_key(key: StoreKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    pub fn cast<U>(self) -> CloudAtom<U> {
        CloudAtom::from_key(self.key)
    }
}

impl<T> CloudAtom<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Allocate a fresh slot holding `value`
    pub async fn new(store: &DataStore, value: &T) -> Result<Self, StoreError> {
        let key = store.fresh_mutable_key();
        store.backend().create(&key, encode(value)?).await?;
        tracing::debug!(key = %key, "created atom");
        Ok(Self::from_key(key))
    }

    pub async fn read(&self, store: &DataStore) -> Result<T, StoreError> {
        let data = store
            .backend()
            .get(&self.key)
            .await?
            .ok_or_else(|| StoreError::NotFound(self.key.to_string()))?;
        decode(&data)
    }

    /// Overwrite unconditionally
    pub async fn force(&self, store: &DataStore, value: &T) -> Result<(), StoreError> {
        store.backend().overwrite(&self.key, encode(value)?).await
    }

    /// Replace the value with `update(current)`, retrying on conflicts
    pub async fn set<F>(&self, store: &DataStore, mut update: F) -> Result<(), StoreError>
    where
        F: FnMut(T) -> T + Send,
    {
        self.transact(store, |current| (true, update(current)))
            .await
            .map(|_| ())
    }

    /// Apply `update` atomically. When it reports `false` the slot is left
    /// unchanged and the call returns `Ok(false)`.
    pub async fn transact<F>(&self, store: &DataStore, mut update: F) -> Result<bool, StoreError>
    where
        F: FnMut(T) -> (bool, T) + Send,
    {
        self.try_transact(store, |current| Ok::<_, StoreError>(update(current)))
            .await
    }

    /// Like [`transact`](Self::transact) with a fallible update. Conflicts are
    /// retried up to the store's bound; exhausting it yields
    /// `StoreError::TransactExhausted`.
    pub async fn try_transact<F, E>(&self, store: &DataStore, mut update: F) -> Result<bool, E>
    where
        F: FnMut(T) -> Result<(bool, T), E> + Send,
        E: From<StoreError>,
    {
        let attempts = store.max_transact_retries().saturating_add(1);

        for attempt in 0..attempts {
            let current = store
                .backend()
                .get_versioned(&self.key)
                .await?
                .ok_or_else(|| StoreError::NotFound(self.key.to_string()))?;

            let value: T = decode(&current.data)?;
            let (apply, next) = update(value)?;
            if !apply {
                return Ok(false);
            }

            let data = encode(&next)?;
            if store
                .backend()
                .compare_and_swap(&self.key, current.version, data)
                .await?
            {
                return Ok(true);
            }

            tracing::debug!(key = %self.key, attempt, "atom update conflicted, retrying");
            tokio::time::sleep(conflict_backoff(attempt)).await;
        }

        tracing::warn!(key = %self.key, attempts, "atom update gave up after repeated conflicts");
        Err(StoreError::TransactExhausted {
            key: self.key.to_string(),
            attempts,
        }
        .into())
    }

    /// Release the slot. Later reads fail with `NotFound`.
    pub async fn free(&self, store: &DataStore) -> Result<(), StoreError> {
        if !store.backend().delete(&self.key).await? {
            return Err(StoreError::NotFound(self.key.to_string()));
        }
        Ok(())
    }
}

fn conflict_backoff(attempt: u32) -> Duration {
    Duration::from_micros(50u64 << attempt.min(7))
}

impl<T> Clone for CloudAtom<T> {
    fn clone(&self) -> Self {
        Self::from_key(self.key.clone())
    }
}

impl<T> PartialEq for CloudAtom<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> std::fmt::Debug for CloudAtom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudAtom").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{CloudCell, CloudSequence};
    use crate::store::{MemoryStore, RedbStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> DataStore {
        DataStore::new(Arc::new(MemoryStore::new()), "atoms")
    }

    #[tokio::test]
    async fn test_atom_lifecycle() {
        let store = store();
        let atom = CloudAtom::new(&store, &10i64).await.unwrap();

        assert_eq!(atom.read(&store).await.unwrap(), 10);

        atom.force(&store, &3).await.unwrap();
        assert_eq!(atom.read(&store).await.unwrap(), 3);

        atom.set(&store, |v| v * 7).await.unwrap();
        assert_eq!(atom.read(&store).await.unwrap(), 21);

        atom.free(&store).await.unwrap();
        assert!(matches!(atom.read(&store).await, Err(StoreError::NotFound(_))));
        assert!(matches!(atom.free(&store).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejected_transaction_leaves_value() {
        let store = store();
        let atom = CloudAtom::new(&store, &vec![1u32, 2]).await.unwrap();

        let applied = atom
            .transact(&store, |mut items| {
                let ok = items.len() < 2;
                items.push(3);
                (ok, items)
            })
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(atom.read(&store).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transactions_are_linearizable() {
        let store = store();
        let atom = CloudAtom::new(&store, &0u64).await.unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                let atom = atom.clone();
                tokio::spawn(async move { atom.transact(&store, |v| (true, v + 1)).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }
        assert_eq!(atom.read(&store).await.unwrap(), 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transactions_on_redb() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(RedbStore::new(temp_dir.path().join("atoms.redb")).unwrap());
        let store = DataStore::new(backend, "atoms");
        let atom = CloudAtom::new(&store, &(0u64, 0u64)).await.unwrap();

        // Both halves move together; a torn write would leave them unequal
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let atom = atom.clone();
                tokio::spawn(async move {
                    let pair = atom.read(&store).await.unwrap();
                    assert_eq!(pair.0, pair.1);
                    atom.transact(&store, |(a, b)| (true, (a + 1, b + 1))).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }
        assert_eq!(atom.read(&store).await.unwrap(), (16, 16));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_as_store_error() {
        let store = store().with_max_transact_retries(2);
        let atom = CloudAtom::new(&store, &0i32).await.unwrap();
        let competing = atom.clone();
        let backend = store.clone();

        // Every attempt loses the race to a concurrent force
        let result = atom
            .try_transact(&store, |v| {
                let competing = competing.clone();
                let backend = backend.clone();
                futures::executor::block_on(async move {
                    competing.force(&backend, &(v + 100)).await
                })?;
                Ok::<_, StoreError>((true, v + 1))
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::TransactExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_atom_name_does_not_resolve_as_immutable() {
        let store = store();
        let atom = CloudAtom::new(&store, &1i64).await.unwrap();
        let name = atom.key().name.clone();

        assert!(matches!(
            CloudCell::<i64>::parse(&store, &name).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            CloudSequence::<i64>::parse(&store, &name).await,
            Err(StoreError::NotFound(_))
        ));

        atom.force(&store, &2).await.unwrap();
        assert_eq!(atom.read(&store).await.unwrap(), 2);
    }
}
