mod config;
mod options;
mod region_server;

pub use config::RegionServerConfig;
pub use options::RegionReplicaOptions;
pub use region_server::try_create_region_server;
pub use region_server::RegionServer;
pub use region_server::RegionServerCreationError;
