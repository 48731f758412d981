use crate::store::FileSetSnapshot;
use crate::storefile::{StoreFileReader, StoreLocation};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Store is one column family of one hosted replica.
///
/// Readers call `snapshot()`, which holds the lock only long enough to clone an `Arc`. Writers of
/// the file set (reconciliation, and flush/compaction on a primary) must hold a `RefreshPermit`,
/// so at most one of them runs per store at a time. No filesystem I/O happens while the snapshot
/// lock is held.
pub struct Store {
    logger: slog::Logger,
    location: StoreLocation,
    current: RwLock<Arc<FileSetSnapshot>>,
    refresh_guard: Arc<Mutex<()>>,
    closed: AtomicBool,
}

/// Proof that the holder is the only one allowed to publish a new snapshot for a store.
pub struct RefreshPermit {
    _guard: OwnedMutexGuard<()>,
}

impl Store {
    pub fn new(logger: slog::Logger, location: StoreLocation) -> Self {
        let logger = logger.new(slog::o!("family" => location.family.clone()));

        Store {
            logger,
            location,
            current: RwLock::new(Arc::new(FileSetSnapshot::empty())),
            refresh_guard: Arc::new(Mutex::new(())),
            closed: AtomicBool::new(false),
        }
    }

    pub fn logger(&self) -> &slog::Logger {
        &self.logger
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn family(&self) -> &str {
        &self.location.family
    }

    /// The current snapshot. Never blocks on reconciliation progress.
    pub fn snapshot(&self) -> Arc<FileSetSnapshot> {
        self.current
            .read()
            .expect("Store.current read lock poison")
            .clone()
    }

    pub fn file_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Single-flight entry for background refreshes: returns `None` if another refresh of this
    /// store is in progress.
    pub fn try_begin_refresh(&self) -> Option<RefreshPermit> {
        self.refresh_guard
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| RefreshPermit { _guard: guard })
    }

    /// Waits for any in-flight refresh to finish.
    pub async fn begin_refresh(&self) -> RefreshPermit {
        let guard = self.refresh_guard.clone().lock_owned().await;
        RefreshPermit { _guard: guard }
    }

    /// Atomically replace the current snapshot with one holding `files`, tagged with the next
    /// version. Returns `None` once the store is closed.
    pub(crate) fn publish(
        &self,
        permit: &RefreshPermit,
        files: Vec<Arc<StoreFileReader>>,
    ) -> Option<Arc<FileSetSnapshot>> {
        self.publish_deferring(permit, files, HashSet::new())
    }

    /// Like `publish`, but records which of `files` are only kept because retiring them was
    /// deferred.
    pub(crate) fn publish_deferring(
        &self,
        _permit: &RefreshPermit,
        files: Vec<Arc<StoreFileReader>>,
        deferred: HashSet<PathBuf>,
    ) -> Option<Arc<FileSetSnapshot>> {
        if self.is_closed() {
            return None;
        }

        let mut current = self.current.write().expect("Store.current write lock poison");
        let next = Arc::new(FileSetSnapshot::new(current.version() + 1, files).with_deferred(deferred));
        let previous = std::mem::replace(&mut *current, next.clone());
        drop(current);

        // Dropping `previous` may close file handles; do it outside of the lock.
        drop(previous);

        Some(next)
    }

    /// Waits for an in-flight refresh to drain, then releases this store's hold on its files.
    /// Reads that already captured a snapshot keep their files open until they finish.
    pub async fn close(&self) {
        let permit = self.begin_refresh().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut current = self.current.write().expect("Store.current write lock poison");
        let next = Arc::new(FileSetSnapshot::new(current.version() + 1, Vec::new()));
        let previous = std::mem::replace(&mut *current, next);
        drop(current);
        drop(permit);

        slog::debug!(
            self.logger,
            "Closed store, released {} store files from snapshot version {}",
            previous.len(),
            previous.version()
        );
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .field("snapshot", &self.snapshot())
            .field("closed", &self.is_closed())
            .finish()
    }
}
