use crate::region::{HostIdentity, RegionId, ReplicaId, ReplicaKey};
use crate::registry::{LocationStore, LocationStoreError, ReplicaLocationRecord};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// ReplicaLocationRegistry records which host serves each (region, replica) and answers lookups
/// for routers.
///
/// Versions are the publish time in milliseconds, bumped past the last version this registry
/// issued so two publishes in the same millisecond still order correctly.
pub struct ReplicaLocationRegistry {
    logger: slog::Logger,
    store: Arc<dyn LocationStore>,
    last_issued_version: AtomicU64,
}

impl ReplicaLocationRegistry {
    pub fn new(logger: slog::Logger, store: Arc<dyn LocationStore>) -> Self {
        ReplicaLocationRegistry {
            logger,
            store,
            last_issued_version: AtomicU64::new(0),
        }
    }

    /// Publish `host` as the location of `key`. Returns the record written, or `None` if the
    /// store already held a newer record (someone re-opened the replica after us).
    pub async fn publish(
        &self,
        key: ReplicaKey,
        host: HostIdentity,
    ) -> Result<Option<ReplicaLocationRecord>, LocationStoreError> {
        let start_time = Utc::now();
        let record = ReplicaLocationRecord {
            key,
            host,
            start_time,
            version: self.next_version(start_time.timestamp_millis()),
        };

        if self.store.put(record.clone()).await? {
            slog::debug!(self.logger, "Published location {:?} -> {}", key, record.host);
            Ok(Some(record))
        } else {
            slog::info!(
                self.logger,
                "Location for {:?} was not published, a newer record exists",
                key
            );
            Ok(None)
        }
    }

    /// Remove the location published as `record`. A newer record for the same key survives.
    pub async fn unpublish(&self, record: &ReplicaLocationRecord) -> Result<bool, LocationStoreError> {
        let removed = self.store.delete(record.key, record.version).await?;
        if !removed {
            slog::info!(
                self.logger,
                "Location for {:?} was not removed, it was superseded",
                record.key
            );
        }

        Ok(removed)
    }

    pub async fn locate(
        &self,
        region_id: RegionId,
        replica_id: ReplicaId,
    ) -> Result<Option<HostIdentity>, LocationStoreError> {
        Ok(self
            .locate_record(ReplicaKey::new(region_id, replica_id))
            .await?
            .map(|record| record.host))
    }

    pub async fn locate_record(&self, key: ReplicaKey) -> Result<Option<ReplicaLocationRecord>, LocationStoreError> {
        self.store.get(key).await
    }

    pub async fn locate_all(&self, region_id: RegionId) -> Result<Vec<ReplicaLocationRecord>, LocationStoreError> {
        self.store.list(region_id).await
    }

    fn next_version(&self, now_millis: i64) -> u64 {
        let candidate = now_millis.max(0) as u64;
        let mut last = self.last_issued_version.load(Ordering::Acquire);
        loop {
            let next = candidate.max(last + 1);
            match self
                .last_issued_version
                .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
