use crate::storefile::StoreFileReader;
use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// FileSetSnapshot is the immutable, versioned list of open store files for one store.
///
/// A read captures one `Arc<FileSetSnapshot>` when it starts and uses it until it finishes. The
/// snapshot shares its file handles with every other snapshot that includes them; a handle is
/// closed when the last snapshot holding it is dropped.
pub struct FileSetSnapshot {
    version: u64,
    // Newest first, so the first hit of a lookup is the most recent value.
    files: Vec<Arc<StoreFileReader>>,
    // Files kept although the last listing no longer showed them. Each is kept for one pass only.
    deferred: HashSet<PathBuf>,
}

impl FileSetSnapshot {
    pub(crate) fn empty() -> Self {
        FileSetSnapshot {
            version: 0,
            files: Vec::new(),
            deferred: HashSet::new(),
        }
    }

    pub(super) fn new(version: u64, mut files: Vec<Arc<StoreFileReader>>) -> Self {
        files.sort_by(|a, b| b.sequence_id().cmp(&a.sequence_id()));
        FileSetSnapshot {
            version,
            files,
            deferred: HashSet::new(),
        }
    }

    pub(super) fn with_deferred(mut self, deferred: HashSet<PathBuf>) -> Self {
        self.deferred = deferred;
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn files(&self) -> &[Arc<StoreFileReader>] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f.path() == path)
    }

    /// Whether `path` was already kept past its retirement by the pass that published this snapshot.
    pub fn is_deferred(&self, path: &Path) -> bool {
        self.deferred.contains(path)
    }

    pub fn get(&self, key: &[u8]) -> io::Result<Option<Bytes>> {
        for file in self.files.iter() {
            if let Some(value) = file.get(key)? {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }
}

impl fmt::Debug for FileSetSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSetSnapshot")
            .field("version", &self.version)
            .field("files", &self.files.iter().map(|f| f.sequence_id()).collect::<Vec<_>>())
            .finish()
    }
}
