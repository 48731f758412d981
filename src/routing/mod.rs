mod request;
mod router;
mod transport;

pub use request::Consistency;
pub use request::ReadRequest;
pub use request::ReadResponse;
pub use router::ConsistencyRouter;
pub use router::RoutingError;
pub use transport::LocalTransport;
pub use transport::ReplicaCallError;
pub use transport::ReplicaTransport;
