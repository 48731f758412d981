mod location_store;
mod registry;

pub use location_store::InMemoryLocationStore;
pub use location_store::LocationStore;
pub use location_store::LocationStoreError;
pub use location_store::ReplicaLocationRecord;
pub use registry::ReplicaLocationRegistry;
