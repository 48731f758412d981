mod descriptor;
mod host;

pub use descriptor::KeyRange;
pub use descriptor::RegionId;
pub use descriptor::RegionInfo;
pub use descriptor::ReplicaDescriptor;
pub use descriptor::ReplicaId;
pub use descriptor::ReplicaKey;
pub use host::HostIdentity;
