use crate::region::{HostIdentity, ReplicaKey};
use crate::replica::{ReplicaLifecycleManager, ReplicaReadError};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum ReplicaCallError {
    /// The host is unreachable or no longer serves the replica.
    #[error("replica {key:?} is unavailable on {host}")]
    Unavailable { host: HostIdentity, key: ReplicaKey },

    #[error("key is outside the key range of replica {0:?}")]
    KeyOutOfRange(ReplicaKey),

    #[error("no such column family '{0}'")]
    NoSuchFamily(String),

    #[error("replica read failed")]
    Io(#[source] io::Error),
}

/// ReplicaTransport delivers one read to one replica on a given host.
#[async_trait::async_trait]
pub trait ReplicaTransport: Send + Sync {
    async fn get(
        &self,
        host: &HostIdentity,
        key: ReplicaKey,
        family: &str,
        row: &[u8],
    ) -> Result<Option<Bytes>, ReplicaCallError>;
}

/// In-process transport: hosts are the lifecycle managers of region servers running in this
/// process.
#[derive(Default)]
pub struct LocalTransport {
    hosts: RwLock<HashMap<HostIdentity, Arc<ReplicaLifecycleManager>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, replicas: Arc<ReplicaLifecycleManager>) {
        self.hosts
            .write()
            .expect("LocalTransport.hosts write lock poison")
            .insert(replicas.host().clone(), replicas);
    }

    pub fn remove_host(&self, host: &HostIdentity) {
        self.hosts
            .write()
            .expect("LocalTransport.hosts write lock poison")
            .remove(host);
    }
}

#[async_trait::async_trait]
impl ReplicaTransport for LocalTransport {
    async fn get(
        &self,
        host: &HostIdentity,
        key: ReplicaKey,
        family: &str,
        row: &[u8],
    ) -> Result<Option<Bytes>, ReplicaCallError> {
        let unavailable = || ReplicaCallError::Unavailable {
            host: host.clone(),
            key,
        };

        let replica = self
            .hosts
            .read()
            .expect("LocalTransport.hosts read lock poison")
            .get(host)
            .and_then(|replicas| replicas.online_replica(key))
            .ok_or_else(unavailable)?;

        match replica.get(family, row) {
            Ok(value) => Ok(value),
            Err(ReplicaReadError::ReplicaClosed(_)) => Err(unavailable()),
            Err(ReplicaReadError::KeyOutOfRange(key)) => Err(ReplicaCallError::KeyOutOfRange(key)),
            Err(ReplicaReadError::NoSuchFamily(family)) => Err(ReplicaCallError::NoSuchFamily(family)),
            Err(ReplicaReadError::Io(e)) => Err(ReplicaCallError::Io(e)),
        }
    }
}
