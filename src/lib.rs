mod refresher;
mod region;
mod registry;
mod replica;
mod routing;
mod server;
mod store;
mod storefile;

pub use refresher::RefreshReport;
pub use refresher::RefreshScheduler;
pub use region::HostIdentity;
pub use region::KeyRange;
pub use region::RegionId;
pub use region::RegionInfo;
pub use region::ReplicaDescriptor;
pub use region::ReplicaId;
pub use region::ReplicaKey;
pub use registry::InMemoryLocationStore;
pub use registry::LocationStore;
pub use registry::LocationStoreError;
pub use registry::ReplicaLocationRecord;
pub use registry::ReplicaLocationRegistry;
pub use replica::LifecycleError;
pub use replica::Replica;
pub use replica::ReplicaLifecycleManager;
pub use replica::ReplicaReadError;
pub use replica::WriteError;
pub use routing::Consistency;
pub use routing::ConsistencyRouter;
pub use routing::LocalTransport;
pub use routing::ReadRequest;
pub use routing::ReadResponse;
pub use routing::ReplicaCallError;
pub use routing::ReplicaTransport;
pub use routing::RoutingError;
pub use server::try_create_region_server;
pub use server::RegionReplicaOptions;
pub use server::RegionServer;
pub use server::RegionServerConfig;
pub use server::RegionServerCreationError;
pub use store::FileSetSnapshot;
pub use store::ReconcileError;
pub use store::ReconcileSummary;
pub use store::RefreshPermit;
pub use store::Store;
pub use store::StoreFileSetReconciler;
pub use storefile::ListFilesError;
pub use storefile::LocalStoreFiles;
pub use storefile::OpenFileError;
pub use storefile::OpenOutcome;
pub use storefile::SequenceId;
pub use storefile::StoreFileMeta;
pub use storefile::StoreFileReader;
pub use storefile::StoreFileSystem;
pub use storefile::StoreLocation;
