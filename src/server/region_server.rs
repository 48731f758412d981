use crate::refresher::{RefreshReport, RefreshScheduler};
use crate::region::{HostIdentity, ReplicaDescriptor, ReplicaKey};
use crate::registry::ReplicaLocationRegistry;
use crate::replica::{LifecycleError, Replica, ReplicaLifecycleManager, ReplicaReadError};
use crate::server::options::RegionReplicaOptionsValidated;
use crate::server::RegionServerConfig;
use crate::store::StoreFileSetReconciler;
use bytes::Bytes;
use std::convert::TryFrom;
use std::sync::Arc;

/// RegionServer is one node hosting region replicas. It owns the node's refresh scheduler, which
/// runs until `shutdown()` or until the server is dropped.
pub struct RegionServer {
    logger: slog::Logger,
    replicas: Arc<ReplicaLifecycleManager>,
    scheduler: Arc<RefreshScheduler>,
    registry: Arc<ReplicaLocationRegistry>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegionServerCreationError {
    #[error("Illegal region replica options: {0}")]
    IllegalOptions(&'static str),
}

/// Must be called from within a tokio runtime.
pub fn try_create_region_server(config: RegionServerConfig) -> Result<RegionServer, RegionServerCreationError> {
    let options = RegionReplicaOptionsValidated::try_from(config.options)
        .map_err(RegionServerCreationError::IllegalOptions)?;

    let logger = config.info_logger.new(slog::o!("host" => config.host.to_string()));

    let scheduler = Arc::new(RefreshScheduler::spawn(
        logger.new(slog::o!("task" => "refresh")),
        StoreFileSetReconciler::new(config.file_system.clone()),
        options.refresh_interval,
        options.max_concurrent_refreshes,
    ));
    let registry = Arc::new(ReplicaLocationRegistry::new(logger.clone(), config.location_store));
    let replicas = Arc::new(ReplicaLifecycleManager::new(
        logger.clone(),
        config.host,
        config.file_system,
        scheduler.clone(),
        registry.clone(),
        options.enforce_read_only,
    ));

    slog::info!(logger, "Created region server with options {:?}", options);

    Ok(RegionServer {
        logger,
        replicas,
        scheduler,
        registry,
    })
}

impl RegionServer {
    pub fn host(&self) -> &HostIdentity {
        self.replicas.host()
    }

    pub fn replicas(&self) -> &Arc<ReplicaLifecycleManager> {
        &self.replicas
    }

    pub fn registry(&self) -> &Arc<ReplicaLocationRegistry> {
        &self.registry
    }

    pub async fn open_replica(&self, descriptor: ReplicaDescriptor) -> Result<Arc<Replica>, LifecycleError> {
        self.replicas.open(descriptor).await
    }

    pub async fn close_replica(&self, key: ReplicaKey) -> Result<(), LifecycleError> {
        self.replicas.close(key).await
    }

    pub fn replica(&self, key: ReplicaKey) -> Option<Arc<Replica>> {
        self.replicas.online_replica(key)
    }

    /// Read from a replica hosted here. A replica that is not open reads as closed.
    pub fn get(&self, key: ReplicaKey, family: &str, row: &[u8]) -> Result<Option<Bytes>, ReplicaReadError> {
        self.replicas
            .online_replica(key)
            .ok_or(ReplicaReadError::ReplicaClosed(key))?
            .get(family, row)
    }

    /// Refresh every hosted secondary now instead of waiting for the next tick.
    pub async fn refresh_now(&self) -> RefreshReport {
        self.scheduler.refresh_now().await
    }

    /// Stop the refresh task and close every hosted replica.
    pub async fn shutdown(&self) {
        slog::info!(self.logger, "Shutting down region server");
        self.scheduler.shutdown();
        self.replicas.close_all().await;
    }
}
