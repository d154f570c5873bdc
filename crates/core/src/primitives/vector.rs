use super::sequence::CloudSequence;
use crate::store::{DataStore, StoreError};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Logical concatenation of sequence partitions, read as one sequence.
///
/// Building a vector copies no data. An empty partition list is allowed and
/// yields an empty vector.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CloudVector<T> {
    partitions: Vec<CloudSequence<T>>,
}

impl<T> CloudVector<T> {
    pub fn of_partitions(partitions: Vec<CloudSequence<T>>) -> Self {
        Self { partitions }
    }

    pub fn partitions(&self) -> &[CloudSequence<T>] {
        &self.partitions
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(CloudSequence::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map a global index to `(partition, local index)`
    fn locate(&self, mut index: usize) -> Option<(usize, usize)> {
        for (partition, seq) in self.partitions.iter().enumerate() {
            if index < seq.len() {
                return Some((partition, index));
            }
            index -= seq.len();
        }
        None
    }
}

impl<T> CloudVector<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub async fn get(&self, store: &DataStore, index: usize) -> Result<T, StoreError> {
        let (partition, local) = self
            .locate(index)
            .ok_or_else(|| StoreError::NotFound(format!("vector[{}]", index)))?;
        self.partitions[partition].get(store, local).await
    }

    /// Stream every element: partition order, then element order
    pub fn enumerate<'a>(
        &'a self,
        store: &'a DataStore,
    ) -> impl Stream<Item = Result<T, StoreError>> + Send + 'a
    where
        T: 'a,
    {
        stream::iter(self.partitions.iter())
            .map(move |partition| partition.enumerate(store))
            .flatten()
    }

    pub async fn to_vec(&self, store: &DataStore) -> Result<Vec<T>, StoreError> {
        self.enumerate(store).try_collect().await
    }
}

impl<T> Clone for CloudVector<T> {
    fn clone(&self) -> Self {
        Self {
            partitions: self.partitions.clone(),
        }
    }
}

impl<T> PartialEq for CloudVector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.partitions == other.partitions
    }
}

impl<T> std::fmt::Debug for CloudVector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudVector")
            .field("partitions", &self.partitions)
            .finish()
    }
}
