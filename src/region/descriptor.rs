use crate::storefile::SequenceId;
use bytes::Bytes;
use std::fmt;

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RegionId(u64);

impl RegionId {
    pub const fn new(id: u64) -> Self {
        RegionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ReplicaId 0 is the primary, the only replica allowed to write. Every other id is a read-only
/// secondary covering the same key range.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub const PRIMARY: ReplicaId = ReplicaId(0);

    pub const fn new(id: u32) -> Self {
        ReplicaId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_primary(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ReplicaKey identifies one replica of one region across the cluster.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaKey {
    pub region_id: RegionId,
    pub replica_id: ReplicaId,
}

impl ReplicaKey {
    pub fn new(region_id: RegionId, replica_id: ReplicaId) -> Self {
        ReplicaKey { region_id, replica_id }
    }

    pub fn primary(region_id: RegionId) -> Self {
        Self::new(region_id, ReplicaId::PRIMARY)
    }
}

/// Half-open key range `[start, end)`. An empty `end` means the range is unbounded above, the same
/// as an empty `start` is unbounded below.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyRange {
    start: Bytes,
    end: Bytes,
}

impl KeyRange {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        KeyRange {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(Bytes::new(), Bytes::new())
    }

    pub fn start(&self) -> &[u8] {
        &self.start
    }

    pub fn end(&self) -> &[u8] {
        &self.end
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= &self.start[..] && (self.end.is_empty() || key < &self.end[..])
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionInfo {
    pub table: String,
    pub key_range: KeyRange,
    pub region_id: RegionId,
}

/// ReplicaDescriptor is what the region lifecycle orchestrator hands us to open or close a
/// replica. All replicas of a region share `region` and `families`; only `replica_id` differs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicaDescriptor {
    pub region: RegionInfo,
    pub replica_id: ReplicaId,
    pub families: Vec<String>,
    pub open_sequence_id: SequenceId,
}

impl ReplicaDescriptor {
    pub fn key(&self) -> ReplicaKey {
        ReplicaKey::new(self.region.region_id, self.replica_id)
    }

    pub fn is_primary(&self) -> bool {
        self.replica_id.is_primary()
    }

    /// Descriptor of a sibling replica of the same region.
    pub fn with_replica_id(&self, replica_id: ReplicaId) -> Self {
        ReplicaDescriptor {
            replica_id,
            ..self.clone()
        }
    }
}
