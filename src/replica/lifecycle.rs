use crate::refresher::RefreshScheduler;
use crate::region::{HostIdentity, ReplicaDescriptor, ReplicaKey};
use crate::registry::{LocationStoreError, ReplicaLocationRecord, ReplicaLocationRegistry};
use crate::replica::Replica;
use crate::store::{ReconcileError, Store, StoreFileSetReconciler};
use crate::storefile::{StoreFileSystem, StoreLocation};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

const INITIAL_LOAD_ATTEMPTS: usize = 5;

/// ReplicaLifecycleManager opens and closes the replicas hosted on this node.
///
/// Opening a secondary registers its stores with the refresh scheduler and publishes its location.
/// Closing does the reverse in an order that never lets a refresh pass see a closed store:
/// stop admitting reads, deregister and drain the scheduler, release file handles, then remove the
/// location record.
///
/// Open and close calls are serialized with each other. Reads never wait on them.
pub struct ReplicaLifecycleManager {
    logger: slog::Logger,
    host: HostIdentity,
    file_system: Arc<dyn StoreFileSystem>,
    reconciler: StoreFileSetReconciler,
    scheduler: Arc<RefreshScheduler>,
    registry: Arc<ReplicaLocationRegistry>,
    enforce_read_only: bool,
    online: RwLock<HashMap<ReplicaKey, OnlineReplica>>,
    transitions: Mutex<()>,
}

struct OnlineReplica {
    replica: Arc<Replica>,
    location: Option<ReplicaLocationRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("replica {0:?} is already open with a different descriptor")]
    DescriptorConflict(ReplicaKey),

    #[error("replica {0:?} is not open on this node")]
    NotOpen(ReplicaKey),

    #[error("failed to load store files")]
    InitialLoad(#[from] ReconcileError),

    #[error("location registry failure")]
    Registry(#[from] LocationStoreError),

    #[error("failed to prepare store directory")]
    Io(#[from] io::Error),
}

impl ReplicaLifecycleManager {
    pub fn new(
        logger: slog::Logger,
        host: HostIdentity,
        file_system: Arc<dyn StoreFileSystem>,
        scheduler: Arc<RefreshScheduler>,
        registry: Arc<ReplicaLocationRegistry>,
        enforce_read_only: bool,
    ) -> Self {
        ReplicaLifecycleManager {
            logger,
            host,
            reconciler: StoreFileSetReconciler::new(file_system.clone()),
            file_system,
            scheduler,
            registry,
            enforce_read_only,
            online: RwLock::new(HashMap::new()),
            transitions: Mutex::new(()),
        }
    }

    /// Open the replica described by `descriptor`, or return the already-open one. Re-opening with
    /// the same descriptor only refreshes the published location.
    pub async fn open(&self, descriptor: ReplicaDescriptor) -> Result<Arc<Replica>, LifecycleError> {
        let _transition = self.transitions.lock().await;
        let key = descriptor.key();

        if let Some(existing) = self.online_replica(key) {
            if existing.descriptor() != &descriptor {
                return Err(LifecycleError::DescriptorConflict(key));
            }

            let record = self.registry.publish(key, self.host.clone()).await?;
            if let Some(online) = self.online_write().get_mut(&key) {
                online.location = record;
            }
            slog::info!(self.logger, "Replica {:?} already open, refreshed its location", key);
            return Ok(existing);
        }

        let logger = self.logger.new(slog::o!(
            "region" => descriptor.region.region_id.as_u64(),
            "replica" => descriptor.replica_id.as_u32()
        ));

        let locations: Vec<StoreLocation> = descriptor
            .families
            .iter()
            .map(|family| StoreLocation {
                table: descriptor.region.table.clone(),
                region_id: descriptor.region.region_id,
                family: family.clone(),
            })
            .collect();
        if descriptor.is_primary() {
            for location in locations.iter() {
                self.file_system.create_location(location)?;
            }
        }

        let stores: Vec<Arc<Store>> = locations
            .into_iter()
            .map(|location| Arc::new(Store::new(logger.clone(), location)))
            .collect();
        self.load_initial_files(&logger, &descriptor, &stores).await?;

        let read_only = self.enforce_read_only && !descriptor.is_primary();
        let replica = Arc::new(Replica::new(
            logger.clone(),
            descriptor,
            stores.clone(),
            self.file_system.clone(),
            read_only,
        ));

        self.online_write().insert(
            key,
            OnlineReplica {
                replica: replica.clone(),
                location: None,
            },
        );
        if !key.replica_id.is_primary() {
            self.scheduler.register(key, stores);
        }

        match self.registry.publish(key, self.host.clone()).await {
            Ok(record) => {
                if let Some(online) = self.online_write().get_mut(&key) {
                    online.location = record;
                }
            }
            Err(e) => {
                slog::warn!(logger, "Failed to publish location, closing replica again: {}", e);
                self.take_offline(key).await;
                return Err(e.into());
            }
        }

        slog::info!(logger, "Opened replica (read only: {})", read_only);
        Ok(replica)
    }

    /// Close the replica. Reads that already captured a snapshot complete against it; reads that
    /// arrive after this call starts are rejected.
    pub async fn close(&self, key: ReplicaKey) -> Result<(), LifecycleError> {
        let _transition = self.transitions.lock().await;

        let online = self.take_offline(key).await.ok_or(LifecycleError::NotOpen(key))?;
        if let Some(record) = online.location.as_ref() {
            self.registry.unpublish(record).await?;
        }

        slog::info!(self.logger, "Closed replica {:?}", key);
        Ok(())
    }

    /// Close every replica hosted here. Failures are logged and do not stop the others.
    pub async fn close_all(&self) {
        for key in self.online_replicas() {
            if let Err(e) = self.close(key).await {
                slog::warn!(self.logger, "Failed to close replica {:?}: {}", key, e);
            }
        }
    }

    pub fn online_replica(&self, key: ReplicaKey) -> Option<Arc<Replica>> {
        self.online
            .read()
            .expect("ReplicaLifecycleManager.online read lock poison")
            .get(&key)
            .map(|online| online.replica.clone())
    }

    pub fn online_replicas(&self) -> Vec<ReplicaKey> {
        let mut keys: Vec<_> = self
            .online
            .read()
            .expect("ReplicaLifecycleManager.online read lock poison")
            .keys()
            .copied()
            .collect();
        keys.sort();
        keys
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    async fn take_offline(&self, key: ReplicaKey) -> Option<OnlineReplica> {
        let online = self.online_write().remove(&key)?;
        online.replica.mark_closing();

        // Deregistering waits for passes already running on these stores.
        self.scheduler.deregister(key).await;
        for store in online.replica.stores() {
            store.close().await;
        }

        Some(online)
    }

    /// One reconciliation pass per store before the replica becomes visible. A secondary whose
    /// primary has not created its directories yet starts empty and catches up on refresh.
    async fn load_initial_files(
        &self,
        logger: &slog::Logger,
        descriptor: &ReplicaDescriptor,
        stores: &[Arc<Store>],
    ) -> Result<(), LifecycleError> {
        for store in stores.iter() {
            let permit = store.begin_refresh().await;
            let reconciler = self.reconciler.clone();
            let store = store.clone();
            // A fresh store has no older files to fall back on, so a pass that lost files to a
            // concurrent compaction is repeated before the replica goes online.
            let result = tokio::task::spawn_blocking(move || {
                let mut result = reconciler.reconcile(&store, &permit);
                for _ in 1..INITIAL_LOAD_ATTEMPTS {
                    match &result {
                        Ok(summary) if summary.vanished > 0 => result = reconciler.reconcile(&store, &permit),
                        _ => break,
                    }
                }
                result
            })
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            match result {
                Ok(summary) => {
                    slog::debug!(logger, "Loaded {} store files on open", summary.file_count);
                }
                Err(e) if !descriptor.is_primary() => {
                    slog::warn!(logger, "Initial store file load failed, relying on refresh: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn online_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ReplicaKey, OnlineReplica>> {
        self.online
            .write()
            .expect("ReplicaLifecycleManager.online write lock poison")
    }
}
