mod lifecycle;
mod memstore;
mod replica;

pub use lifecycle::LifecycleError;
pub use lifecycle::ReplicaLifecycleManager;
pub use replica::Replica;
pub use replica::ReplicaReadError;
pub use replica::WriteError;
