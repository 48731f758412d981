use crate::region::{RegionId, ReplicaId};
use bytes::Bytes;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Consistency {
    /// Only the primary may answer.
    Strong,
    /// Any replica may answer, possibly with data that lags the primary.
    Timeline,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadRequest {
    pub region_id: RegionId,
    pub family: String,
    pub key: Bytes,
    pub consistency: Consistency,
    /// Pins a TIMELINE read to one replica. Ignored for STRONG reads.
    pub replica_id: Option<ReplicaId>,
}

impl ReadRequest {
    pub fn strong(region_id: RegionId, family: impl Into<String>, key: impl Into<Bytes>) -> Self {
        ReadRequest {
            region_id,
            family: family.into(),
            key: key.into(),
            consistency: Consistency::Strong,
            replica_id: None,
        }
    }

    pub fn timeline(region_id: RegionId, family: impl Into<String>, key: impl Into<Bytes>) -> Self {
        ReadRequest {
            consistency: Consistency::Timeline,
            ..Self::strong(region_id, family, key)
        }
    }

    pub fn with_replica_id(mut self, replica_id: ReplicaId) -> Self {
        self.replica_id = Some(replica_id);
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadResponse {
    /// `None` means the serving replica has no value for the key.
    pub value: Option<Bytes>,
    pub served_by: ReplicaId,
    /// True when a secondary answered, so the value may lag the primary.
    pub is_stale: bool,
}

impl ReadResponse {
    pub(super) fn new(value: Option<Bytes>, served_by: ReplicaId) -> Self {
        ReadResponse {
            value,
            served_by,
            is_stale: !served_by.is_primary(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}
