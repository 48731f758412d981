use crate::region::{RegionId, ReplicaId, ReplicaKey};
use crate::registry::{LocationStoreError, ReplicaLocationRecord, ReplicaLocationRegistry};
use crate::routing::{Consistency, ReadRequest, ReadResponse, ReplicaCallError, ReplicaTransport};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// ConsistencyRouter decides which replica serves a read and sends it there.
///
/// - STRONG reads go to the primary, always.
/// - TIMELINE reads pinned to a replica id go to exactly that replica, with no fallback.
/// - Unpinned TIMELINE reads try the region's secondaries in random order and fall back to the
///   primary when no secondary can answer, or when the secondary asked has no value for the key.
///
/// Locations are cached. A cached location is dropped when its replica turns out to be
/// unavailable or reports the key out of range, and is only ever replaced by a newer record.
pub struct ConsistencyRouter {
    logger: slog::Logger,
    registry: Arc<ReplicaLocationRegistry>,
    transport: Arc<dyn ReplicaTransport>,
    locations: Mutex<HashMap<ReplicaKey, ReplicaLocationRecord>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no replica of region {region_id:?} could serve the read, tried {tried:?}")]
    NoViableReplica {
        region_id: RegionId,
        tried: Vec<ReplicaId>,
    },

    #[error("replica {0:?} is unavailable")]
    ReplicaUnavailable(ReplicaKey),

    /// The location used for this replica is stale. The cached entry has been dropped; the caller
    /// decides whether to retry.
    #[error("key is outside the key range of replica {0:?}")]
    KeyOutOfRange(ReplicaKey),

    #[error("no such column family '{0}'")]
    NoSuchFamily(String),

    #[error("replica {key:?} failed to serve the read")]
    ReplicaFailed {
        key: ReplicaKey,
        #[source]
        source: ReplicaCallError,
    },

    #[error("location registry failure")]
    Registry(#[from] LocationStoreError),
}

impl ConsistencyRouter {
    pub fn new(
        logger: slog::Logger,
        registry: Arc<ReplicaLocationRegistry>,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Self {
        ConsistencyRouter {
            logger,
            registry,
            transport,
            locations: Mutex::new(HashMap::new()),
        }
    }

    /// The replicas to try for `request`, in order.
    pub async fn route(&self, request: &ReadRequest) -> Result<Vec<ReplicaId>, RoutingError> {
        match (request.consistency, request.replica_id) {
            (Consistency::Strong, _) => Ok(vec![ReplicaId::PRIMARY]),
            (Consistency::Timeline, Some(replica_id)) => Ok(vec![replica_id]),
            (Consistency::Timeline, None) => {
                let records = self.registry.locate_all(request.region_id).await?;

                let mut secondaries = Vec::with_capacity(records.len());
                for record in records {
                    if !record.key.replica_id.is_primary() {
                        secondaries.push(record.key.replica_id);
                    }
                    self.remember(record);
                }
                secondaries.shuffle(&mut rand::thread_rng());
                secondaries.push(ReplicaId::PRIMARY);

                Ok(secondaries)
            }
        }
    }

    pub async fn read(&self, request: &ReadRequest) -> Result<ReadResponse, RoutingError> {
        let candidates = self.route(request).await?;
        let pinned = request.consistency == Consistency::Strong || request.replica_id.is_some();

        let mut tried = Vec::with_capacity(candidates.len());
        // A secondary that answered "not found". Stands as the answer if the primary can't be reached.
        let mut secondary_miss = None;
        for replica_id in candidates {
            if secondary_miss.is_some() && !replica_id.is_primary() {
                continue;
            }
            tried.push(replica_id);

            let key = ReplicaKey::new(request.region_id, replica_id);
            let record = match self.locate(key).await? {
                Some(record) => record,
                None => {
                    slog::debug!(self.logger, "No location for {:?}", key);
                    continue;
                }
            };

            match self
                .transport
                .get(&record.host, key, &request.family, &request.key)
                .await
            {
                Ok(Some(value)) => return Ok(ReadResponse::new(Some(value), replica_id)),
                Ok(None) if !pinned && !replica_id.is_primary() => {
                    secondary_miss = Some(replica_id);
                }
                Ok(None) => return Ok(ReadResponse::new(None, replica_id)),
                Err(ReplicaCallError::Unavailable { .. }) => {
                    slog::debug!(self.logger, "{:?} unavailable on {}, trying next", key, record.host);
                    self.invalidate(key);
                }
                Err(ReplicaCallError::KeyOutOfRange(_)) => {
                    self.invalidate(key);
                    return Err(RoutingError::KeyOutOfRange(key));
                }
                Err(ReplicaCallError::NoSuchFamily(family)) => return Err(RoutingError::NoSuchFamily(family)),
                Err(source) => return Err(RoutingError::ReplicaFailed { key, source }),
            }
        }

        if let Some(replica_id) = secondary_miss {
            return Ok(ReadResponse::new(None, replica_id));
        }
        if pinned {
            let key = ReplicaKey::new(request.region_id, tried[0]);
            return Err(RoutingError::ReplicaUnavailable(key));
        }
        Err(RoutingError::NoViableReplica {
            region_id: request.region_id,
            tried,
        })
    }

    /// Forget the cached location of one replica.
    pub fn invalidate(&self, key: ReplicaKey) {
        self.locations_lock().remove(&key);
    }

    /// Forget every cached location of a region.
    pub fn invalidate_region(&self, region_id: RegionId) {
        self.locations_lock().retain(|key, _| key.region_id != region_id);
    }

    pub fn cached_location(&self, key: ReplicaKey) -> Option<ReplicaLocationRecord> {
        self.locations_lock().get(&key).cloned()
    }

    async fn locate(&self, key: ReplicaKey) -> Result<Option<ReplicaLocationRecord>, RoutingError> {
        if let Some(record) = self.cached_location(key) {
            return Ok(Some(record));
        }

        Ok(self.registry.locate_record(key).await?.map(|record| self.remember(record)))
    }

    /// Cache `record` unless a newer one is already cached. Returns whichever is newest.
    fn remember(&self, record: ReplicaLocationRecord) -> ReplicaLocationRecord {
        let mut locations = self.locations_lock();
        match locations.get(&record.key) {
            Some(cached) if cached.version >= record.version => cached.clone(),
            _ => {
                locations.insert(record.key, record.clone());
                record
            }
        }
    }

    fn locations_lock(&self) -> std::sync::MutexGuard<'_, HashMap<ReplicaKey, ReplicaLocationRecord>> {
        self.locations
            .lock()
            .expect("ConsistencyRouter.locations mutex guard poison")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HostIdentity;
    use crate::registry::{InMemoryLocationStore, LocationStore};
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    const REGION: RegionId = RegionId::new(5);

    #[derive(Copy, Clone)]
    enum Behavior {
        Value(&'static str),
        NotFound,
        Unavailable,
        OutOfRange,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        behaviors: Mutex<HashMap<ReplicaId, Behavior>>,
        calls: Mutex<Vec<ReplicaId>>,
    }

    impl ScriptedTransport {
        fn script(&self, replica_id: u32, behavior: Behavior) {
            self.behaviors
                .lock()
                .unwrap()
                .insert(ReplicaId::new(replica_id), behavior);
        }

        fn calls(&self) -> Vec<ReplicaId> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ReplicaTransport for ScriptedTransport {
        async fn get(
            &self,
            host: &HostIdentity,
            key: ReplicaKey,
            _family: &str,
            _row: &[u8],
        ) -> Result<Option<Bytes>, ReplicaCallError> {
            self.calls.lock().unwrap().push(key.replica_id);
            let behavior = self.behaviors.lock().unwrap().get(&key.replica_id).copied();
            match behavior {
                Some(Behavior::Value(value)) => Ok(Some(Bytes::from(value))),
                Some(Behavior::NotFound) => Ok(None),
                Some(Behavior::OutOfRange) => Err(ReplicaCallError::KeyOutOfRange(key)),
                Some(Behavior::Unavailable) | None => Err(ReplicaCallError::Unavailable {
                    host: host.clone(),
                    key,
                }),
            }
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryLocationStore,
        gets: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LocationStore for CountingStore {
        async fn put(&self, record: ReplicaLocationRecord) -> Result<bool, LocationStoreError> {
            self.inner.put(record).await
        }

        async fn delete(&self, key: ReplicaKey, version: u64) -> Result<bool, LocationStoreError> {
            self.inner.delete(key, version).await
        }

        async fn get(&self, key: ReplicaKey) -> Result<Option<ReplicaLocationRecord>, LocationStoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn list(&self, region_id: RegionId) -> Result<Vec<ReplicaLocationRecord>, LocationStoreError> {
            self.inner.list(region_id).await
        }
    }

    struct Fixture {
        router: ConsistencyRouter,
        transport: Arc<ScriptedTransport>,
        store: Arc<CountingStore>,
        registry: Arc<ReplicaLocationRegistry>,
    }

    async fn fixture(replicas: &[u32]) -> Fixture {
        let store = Arc::new(CountingStore::default());
        let registry = Arc::new(ReplicaLocationRegistry::new(logger(), store.clone()));
        for replica in replicas {
            registry
                .publish(
                    ReplicaKey::new(REGION, ReplicaId::new(*replica)),
                    HostIdentity::new(format!("rs{}", replica), 16020, 1),
                )
                .await
                .unwrap();
        }
        let transport = Arc::new(ScriptedTransport::default());
        let router = ConsistencyRouter::new(logger(), registry.clone(), transport.clone());

        Fixture {
            router,
            transport,
            store,
            registry,
        }
    }

    #[tokio::test]
    async fn strong_reads_always_go_to_the_primary() {
        let f = fixture(&[0, 1, 2]).await;
        f.transport.script(0, Behavior::Value("p"));
        f.transport.script(1, Behavior::Value("s"));

        let request = ReadRequest::strong(REGION, "cf", "k").with_replica_id(ReplicaId::new(1));
        assert_eq!(f.router.route(&request).await.unwrap(), vec![ReplicaId::PRIMARY]);

        let response = f.router.read(&request).await.unwrap();
        assert_eq!(response.value, Some(Bytes::from("p")));
        assert_eq!(response.served_by, ReplicaId::PRIMARY);
        assert!(!response.is_stale);
        assert_eq!(f.transport.calls(), vec![ReplicaId::PRIMARY]);
    }

    #[tokio::test]
    async fn pinned_timeline_reads_never_fall_back() {
        let f = fixture(&[0, 1, 2]).await;
        f.transport.script(0, Behavior::Value("p"));
        f.transport.script(2, Behavior::NotFound);

        let pinned = ReadRequest::timeline(REGION, "cf", "k").with_replica_id(ReplicaId::new(2));
        assert_eq!(f.router.route(&pinned).await.unwrap(), vec![ReplicaId::new(2)]);

        let response = f.router.read(&pinned).await.unwrap();
        assert_eq!(response.value, None);
        assert_eq!(response.served_by, ReplicaId::new(2));
        assert!(response.is_stale);

        f.transport.script(2, Behavior::Unavailable);
        let result = f.router.read(&pinned).await;
        assert!(matches!(result, Err(RoutingError::ReplicaUnavailable(key)) if key.replica_id == ReplicaId::new(2)));
        assert!(!f.transport.calls().contains(&ReplicaId::PRIMARY));
    }

    #[tokio::test]
    async fn unpinned_timeline_read_falls_back_to_primary_on_not_found() {
        let f = fixture(&[0, 1, 2]).await;
        f.transport.script(0, Behavior::Value("p"));
        f.transport.script(1, Behavior::NotFound);
        f.transport.script(2, Behavior::NotFound);

        let request = ReadRequest::timeline(REGION, "cf", "k");
        let candidates = f.router.route(&request).await.unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates.last(), Some(&ReplicaId::PRIMARY));

        let response = f.router.read(&request).await.unwrap();
        assert_eq!(response.served_by, ReplicaId::PRIMARY);
        assert_eq!(response.value, Some(Bytes::from("p")));

        // One secondary asked, then straight to the primary.
        let calls = f.transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].is_primary());
        assert_eq!(calls[1], ReplicaId::PRIMARY);
    }

    #[tokio::test]
    async fn unpinned_timeline_read_skips_unavailable_secondaries() {
        let f = fixture(&[0, 1, 2]).await;
        f.transport.script(1, Behavior::Unavailable);
        f.transport.script(2, Behavior::Value("s2"));
        f.transport.script(0, Behavior::Value("p"));

        let response = f.router.read(&ReadRequest::timeline(REGION, "cf", "k")).await.unwrap();
        assert_eq!(response.served_by, ReplicaId::new(2));
        assert!(response.is_stale);
    }

    #[tokio::test]
    async fn secondary_not_found_stands_when_primary_is_unreachable() {
        let f = fixture(&[0, 1]).await;
        f.transport.script(1, Behavior::NotFound);
        f.transport.script(0, Behavior::Unavailable);

        let response = f.router.read(&ReadRequest::timeline(REGION, "cf", "k")).await.unwrap();
        assert_eq!(response.value, None);
        assert_eq!(response.served_by, ReplicaId::new(1));
        assert!(response.is_stale);
        assert_eq!(f.transport.calls(), vec![ReplicaId::new(1), ReplicaId::PRIMARY]);

        // Same when the primary has no location at all.
        let f = fixture(&[1]).await;
        f.transport.script(1, Behavior::NotFound);
        let response = f.router.read(&ReadRequest::timeline(REGION, "cf", "k")).await.unwrap();
        assert_eq!(response.served_by, ReplicaId::new(1));
        assert_eq!(response.value, None);
    }

    #[tokio::test]
    async fn unpinned_read_without_secondaries_is_not_treated_as_pinned() {
        let f = fixture(&[0]).await;
        f.transport.script(0, Behavior::Unavailable);

        let result = f.router.read(&ReadRequest::timeline(REGION, "cf", "k")).await;
        assert!(matches!(result, Err(RoutingError::NoViableReplica { .. })));

        let result = f.router.read(&ReadRequest::strong(REGION, "cf", "k")).await;
        assert!(matches!(result, Err(RoutingError::ReplicaUnavailable(key)) if key.replica_id.is_primary()));
    }

    #[tokio::test]
    async fn nothing_available_is_a_routing_error() {
        let f = fixture(&[1]).await;

        let result = f.router.read(&ReadRequest::timeline(REGION, "cf", "k")).await;
        match result {
            Err(RoutingError::NoViableReplica { region_id, tried }) => {
                assert_eq!(region_id, REGION);
                assert_eq!(tried, vec![ReplicaId::new(1), ReplicaId::PRIMARY]);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn out_of_range_is_surfaced_and_drops_the_cached_location() {
        let f = fixture(&[0, 1]).await;
        f.transport.script(1, Behavior::OutOfRange);
        let key = ReplicaKey::new(REGION, ReplicaId::new(1));

        let request = ReadRequest::timeline(REGION, "cf", "k").with_replica_id(ReplicaId::new(1));
        let result = f.router.read(&request).await;
        assert!(matches!(result, Err(RoutingError::KeyOutOfRange(k)) if k == key));
        assert_eq!(f.router.cached_location(key), None);
        assert_eq!(f.transport.calls(), vec![ReplicaId::new(1)]);
    }

    #[tokio::test]
    async fn locations_are_cached_until_invalidated() {
        let f = fixture(&[0]).await;
        f.transport.script(0, Behavior::Value("p"));
        let request = ReadRequest::strong(REGION, "cf", "k");

        f.router.read(&request).await.unwrap();
        f.router.read(&request).await.unwrap();
        assert_eq!(f.store.gets.load(Ordering::SeqCst), 1);

        f.router.invalidate_region(REGION);
        f.router.read(&request).await.unwrap();
        assert_eq!(f.store.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn older_records_never_replace_newer_cached_ones() {
        let f = fixture(&[0]).await;
        let key = ReplicaKey::primary(REGION);
        let current = f.registry.locate_record(key).await.unwrap().unwrap();
        f.router.remember(current.clone());

        let stale = ReplicaLocationRecord {
            host: HostIdentity::new("old-rs", 16020, 0),
            start_time: Utc::now(),
            version: current.version - 1,
            key,
        };
        assert_eq!(f.router.remember(stale), current);
        assert_eq!(f.router.cached_location(key), Some(current));
    }
}
