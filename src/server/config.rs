use crate::region::HostIdentity;
use crate::registry::LocationStore;
use crate::server::RegionReplicaOptions;
use crate::storefile::StoreFileSystem;
use std::sync::Arc;

pub struct RegionServerConfig {
    pub host: HostIdentity,
    pub info_logger: slog::Logger,
    // Where every region's store directories live. Shared by all nodes hosting replicas of the
    // same regions.
    pub file_system: Arc<dyn StoreFileSystem>,
    pub location_store: Arc<dyn LocationStore>,
    pub options: RegionReplicaOptions,
}
