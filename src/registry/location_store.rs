use crate::region::{HostIdentity, RegionId, ReplicaKey};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Where one replica of one region is served from. `version` orders records for the same key:
/// a record with a lower version is stale and must never overwrite or be preferred over a higher
/// one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicaLocationRecord {
    pub key: ReplicaKey,
    pub host: HostIdentity,
    pub start_time: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LocationStoreError {
    #[error("location store unavailable: {0}")]
    Unavailable(String),
}

/// LocationStore is the durable collaborator behind the registry.
///
/// Writes are conditional so that concurrent open/close of the same replica on different nodes
/// resolve as last-writer-wins by version, regardless of the order they arrive in.
#[async_trait::async_trait]
pub trait LocationStore: Send + Sync {
    /// Store `record` unless a record with a greater or equal version already exists. Returns
    /// whether the write was applied.
    async fn put(&self, record: ReplicaLocationRecord) -> Result<bool, LocationStoreError>;

    /// Delete the record for `key` if its version is at most `version`. A newer record written
    /// by a later open is left alone. Returns whether a record was deleted.
    async fn delete(&self, key: ReplicaKey, version: u64) -> Result<bool, LocationStoreError>;

    async fn get(&self, key: ReplicaKey) -> Result<Option<ReplicaLocationRecord>, LocationStoreError>;

    /// All live records for a region, ordered by replica id.
    async fn list(&self, region_id: RegionId) -> Result<Vec<ReplicaLocationRecord>, LocationStoreError>;
}

/// In-process LocationStore. Used by tests and by single-node deployments.
#[derive(Default)]
pub struct InMemoryLocationStore {
    records: Mutex<BTreeMap<ReplicaKey, ReplicaLocationRecord>>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn put(&self, record: ReplicaLocationRecord) -> Result<bool, LocationStoreError> {
        let mut records = self.records.lock().expect("InMemoryLocationStore mutex guard poison");
        if let Some(existing) = records.get(&record.key) {
            if existing.version >= record.version {
                return Ok(false);
            }
        }
        records.insert(record.key, record);
        Ok(true)
    }

    async fn delete(&self, key: ReplicaKey, version: u64) -> Result<bool, LocationStoreError> {
        let mut records = self.records.lock().expect("InMemoryLocationStore mutex guard poison");
        match records.get(&key) {
            Some(existing) if existing.version <= version => {
                records.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: ReplicaKey) -> Result<Option<ReplicaLocationRecord>, LocationStoreError> {
        let records = self.records.lock().expect("InMemoryLocationStore mutex guard poison");
        Ok(records.get(&key).cloned())
    }

    async fn list(&self, region_id: RegionId) -> Result<Vec<ReplicaLocationRecord>, LocationStoreError> {
        let records = self.records.lock().expect("InMemoryLocationStore mutex guard poison");
        Ok(records
            .values()
            .filter(|record| record.key.region_id == region_id)
            .cloned()
            .collect())
    }
}
