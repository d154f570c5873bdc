use super::{CloudStore, StoreError, StoreKey, Versioned};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Persistent store backed by redb.
///
/// Each value is stored as an 8-byte big-endian version followed by the
/// payload. redb serializes write transactions, so a compare-and-swap done
/// inside one write transaction is atomic across every caller.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(backend)?;

        let write_txn = db.begin_write().map_err(backend)?;
        {
            let _entries = write_txn.open_table(ENTRIES_TABLE).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn read_entry(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ENTRIES_TABLE).map_err(backend)?;
        let entry = table.get(key).map_err(backend)?;
        entry.map(|guard| unpack(guard.value())).transpose()
    }

    /// Run `update` against the current entry inside one write transaction.
    /// The returned entry, if any, is written back before commit.
    fn write_entry<T>(
        &self,
        key: &str,
        update: impl FnOnce(Option<Versioned>) -> Result<(Option<Versioned>, T), StoreError>,
    ) -> Result<T, StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        let outcome = {
            let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(backend)?;
            let current = match table.get(key).map_err(backend)? {
                Some(guard) => Some(unpack(guard.value())?),
                None => None,
            };
            let (next, outcome) = update(current)?;
            if let Some(next) = next {
                let packed = pack(&next);
                table.insert(key, packed.as_slice()).map_err(backend)?;
            }
            outcome
        };
        write_txn.commit().map_err(backend)?;
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl CloudStore for RedbStore {
    async fn create(&self, key: &StoreKey, data: Bytes) -> Result<(), StoreError> {
        let name = key.to_string();
        self.write_entry(&name, |current| match current {
            Some(_) => Err(StoreError::AlreadyExists(key.to_string())),
            None => Ok((Some(Versioned { version: 0, data }), ())),
        })
    }

    async fn overwrite(&self, key: &StoreKey, data: Bytes) -> Result<(), StoreError> {
        let name = key.to_string();
        self.write_entry(&name, |current| match current {
            Some(entry) => Ok((
                Some(Versioned {
                    version: entry.version + 1,
                    data,
                }),
                (),
            )),
            None => Err(StoreError::NotFound(key.to_string())),
        })
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self.read_entry(&key.to_string())?.map(|entry| entry.data))
    }

    async fn get_versioned(&self, key: &StoreKey) -> Result<Option<Versioned>, StoreError> {
        self.read_entry(&key.to_string())
    }

    async fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected: u64,
        data: Bytes,
    ) -> Result<bool, StoreError> {
        let name = key.to_string();
        self.write_entry(&name, |current| match current {
            Some(entry) if entry.version == expected => Ok((
                Some(Versioned {
                    version: entry.version + 1,
                    data,
                }),
                true,
            )),
            Some(_) => Ok((None, false)),
            None => Err(StoreError::NotFound(key.to_string())),
        })
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool, StoreError> {
        Ok(self.read_entry(&key.to_string())?.is_some())
    }

    async fn delete(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        let existed = {
            let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(backend)?;
            let removed = table.remove(key.to_string().as_str()).map_err(backend)?;
            removed.is_some()
        };
        write_txn.commit().map_err(backend)?;
        Ok(existed)
    }
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn pack(entry: &Versioned) -> Vec<u8> {
    let mut packed = Vec::with_capacity(8 + entry.data.len());
    packed.extend_from_slice(&entry.version.to_be_bytes());
    packed.extend_from_slice(&entry.data);
    packed
}

fn unpack(raw: &[u8]) -> Result<Versioned, StoreError> {
    if raw.len() < 8 {
        return Err(StoreError::Backend(format!(
            "corrupt entry: {} bytes is shorter than the version header",
            raw.len()
        )));
    }
    let (header, data) = raw.split_at(8);
    let mut version = [0u8; 8];
    version.copy_from_slice(header);
    Ok(Versioned {
        version: u64::from_be_bytes(version),
        data: Bytes::copy_from_slice(data),
    })
}
