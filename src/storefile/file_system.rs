use crate::region::RegionId;
use crate::storefile::{SequenceId, StoreFileReader};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};

/// StoreLocation addresses the persisted directory of one column family of one region. All
/// replicas of a region resolve to the same location: secondaries read the primary's files.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StoreLocation {
    pub table: String,
    pub region_id: RegionId,
    pub family: String,
}

/// StoreFileMeta is what a listing returns: path plus sequence id. The path is the identity used
/// to diff file sets.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StoreFileMeta {
    path: PathBuf,
    sequence_id: SequenceId,
}

impl StoreFileMeta {
    pub fn new(path: impl Into<PathBuf>, sequence_id: SequenceId) -> Self {
        StoreFileMeta {
            path: path.into(),
            sequence_id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }
}

/// Result of trying to open a listed file. A file that disappeared between listing and opening is
/// an expected outcome of racing the primary's compaction, so it is modelled as a value here and
/// not as an error.
#[derive(Debug)]
pub enum OpenOutcome {
    Opened(StoreFileReader),
    Vanished,
}

#[derive(Debug, thiserror::Error)]
pub enum ListFilesError {
    // The primary may not have created the directory yet. This is not the same as "no files".
    #[error("store directory {path:?} does not exist")]
    MissingDirectory { path: PathBuf },

    #[error("store directory {path:?} is unreadable")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum OpenFileError {
    #[error("failed to open store file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// StoreFileSystem is the persisted-directory collaborator. Listing and opening are all a
/// secondary ever needs; writing and removing are used only by the primary's flush and
/// compaction.
///
/// Implementations must make new files visible atomically (a listing never returns a partially
/// written file) and must never mutate a file in place.
pub trait StoreFileSystem: Send + Sync {
    /// Ensure the directory for `location` exists. Idempotent.
    fn create_location(&self, location: &StoreLocation) -> io::Result<()>;

    /// List the store files currently present for `location`, ordered by sequence id.
    fn list(&self, location: &StoreLocation) -> Result<Vec<StoreFileMeta>, ListFilesError>;

    fn open(&self, logger: &slog::Logger, meta: &StoreFileMeta) -> Result<OpenOutcome, OpenFileError>;

    /// Persist `entries` (sorted by key, unique keys) as a new store file.
    fn write(
        &self,
        location: &StoreLocation,
        sequence_id: SequenceId,
        entries: &[(Bytes, Bytes)],
    ) -> io::Result<StoreFileMeta>;

    /// Delete a superseded store file. Removing a file that is already gone succeeds.
    fn remove(&self, meta: &StoreFileMeta) -> io::Result<()>;
}
