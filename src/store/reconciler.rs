use crate::store::{RefreshPermit, Store};
use crate::storefile::{ListFilesError, OpenFileError, OpenOutcome, StoreFileSystem};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// StoreFileSetReconciler brings a store's snapshot in line with the files its primary currently
/// has on disk.
///
/// One pass:
/// 1. List the primary's files. If listing fails the pass is abandoned and the snapshot is left
///    untouched.
/// 2. Diff by path against the current snapshot: `to_open` = listed - current,
///    `to_retire` = current - listed.
/// 3. Open each file in `to_open`. A file that vanished in between (the primary compacted it away)
///    is dropped from the result; any other open failure abandons the pass.
/// 4. Publish `(current - to_retire) + opened` as the next snapshot version. Retired handles are
///    not closed here; they close when the last read holding an older snapshot lets go.
///
/// If a file vanished, the files it may have been compacted from are kept for one more pass
/// instead of being retired, so a read never loses data that only moved between files. The next
/// pass that sees a stable listing retires them.
#[derive(Clone)]
pub struct StoreFileSetReconciler {
    file_system: Arc<dyn StoreFileSystem>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconcileSummary {
    pub version: u64,
    pub file_count: usize,
    pub opened: usize,
    pub retired: usize,
    pub vanished: usize,
    pub deferred: usize,
}

impl ReconcileSummary {
    pub fn changed(&self) -> bool {
        self.opened > 0 || self.retired > 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to list store files")]
    ListFailed(#[from] ListFilesError),

    #[error("failed to open store file")]
    OpenFailed(#[from] OpenFileError),

    #[error("store is closed")]
    StoreClosed,
}

impl StoreFileSetReconciler {
    pub fn new(file_system: Arc<dyn StoreFileSystem>) -> Self {
        StoreFileSetReconciler { file_system }
    }

    pub fn file_system(&self) -> &Arc<dyn StoreFileSystem> {
        &self.file_system
    }

    pub fn reconcile(&self, store: &Store, permit: &RefreshPermit) -> Result<ReconcileSummary, ReconcileError> {
        if store.is_closed() {
            return Err(ReconcileError::StoreClosed);
        }

        let listed = self.file_system.list(store.location())?;
        let current = store.snapshot();

        let listed_paths: HashSet<&Path> = listed.iter().map(|meta| meta.path()).collect();
        let to_open: Vec<_> = listed.iter().filter(|meta| !current.contains(meta.path())).collect();

        let mut opened = Vec::with_capacity(to_open.len());
        let mut vanished = 0;
        for meta in to_open {
            match self.file_system.open(store.logger(), meta)? {
                OpenOutcome::Opened(reader) => opened.push(Arc::new(reader)),
                OpenOutcome::Vanished => {
                    slog::debug!(
                        store.logger(),
                        "Store file {:?} vanished before it could be opened",
                        meta.path()
                    );
                    vanished += 1;
                }
            }
        }

        // A vanished file usually means a compaction replaced it with output this listing missed,
        // so unlisted files are kept for one more pass. Never for two, or churn would pile them up.
        let mut retired = 0;
        let mut deferred = HashSet::new();
        let mut files = Vec::with_capacity(listed.len());
        for file in current.files() {
            if listed_paths.contains(file.path()) {
                files.push(file.clone());
            } else if vanished > 0 && !current.is_deferred(file.path()) {
                deferred.insert(file.path().to_path_buf());
                files.push(file.clone());
            } else {
                retired += 1;
            }
        }
        let opened_count = opened.len();
        let deferred_count = deferred.len();
        files.extend(opened);

        let published = store
            .publish_deferring(permit, files, deferred)
            .ok_or(ReconcileError::StoreClosed)?;

        let summary = ReconcileSummary {
            version: published.version(),
            file_count: published.len(),
            opened: opened_count,
            retired,
            vanished,
            deferred: deferred_count,
        };
        if summary.changed() || vanished > 0 {
            slog::debug!(store.logger(), "Reconciled store files: {:?}", summary);
        }

        Ok(summary)
    }
}
