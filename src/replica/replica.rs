use crate::region::{ReplicaDescriptor, ReplicaKey};
use crate::replica::memstore::MemStore;
use crate::store::{FileSetSnapshot, Store};
use crate::storefile::{OpenFileError, OpenOutcome, SequenceId, StoreFileMeta, StoreFileReader, StoreFileSystem};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Replica is one hosted copy of a region on this node.
///
/// Reads go through `get`, which captures the store's current snapshot once and answers from it.
/// A primary also buffers writes in memory and persists them with `flush`/`compact`, which is
/// what secondaries pick up through reconciliation. Every write entry point rejects the call on a
/// read-only replica before touching any state.
pub struct Replica {
    logger: slog::Logger,
    descriptor: ReplicaDescriptor,
    stores: BTreeMap<String, Arc<Store>>,
    memstores: BTreeMap<String, Mutex<MemStore>>,
    file_system: Arc<dyn StoreFileSystem>,
    read_only: bool,
    closing: AtomicBool,
    next_sequence_id: AtomicU64,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaReadError {
    #[error("replica {0:?} is closed")]
    ReplicaClosed(ReplicaKey),

    #[error("key is outside the key range of replica {0:?}")]
    KeyOutOfRange(ReplicaKey),

    #[error("no such column family '{0}'")]
    NoSuchFamily(String),

    #[error("failed to read store files")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("replica {0:?} is read-only")]
    ReadOnly(ReplicaKey),

    #[error("replica {0:?} is closed")]
    ReplicaClosed(ReplicaKey),

    #[error("key is outside the key range of replica {0:?}")]
    KeyOutOfRange(ReplicaKey),

    #[error("no such column family '{0}'")]
    NoSuchFamily(String),

    #[error("failed to persist store file")]
    Io(#[from] io::Error),
}

impl Replica {
    pub(super) fn new(
        logger: slog::Logger,
        descriptor: ReplicaDescriptor,
        stores: Vec<Arc<Store>>,
        file_system: Arc<dyn StoreFileSystem>,
        read_only: bool,
    ) -> Self {
        let memstores = if descriptor.is_primary() {
            stores
                .iter()
                .map(|store| (store.family().to_string(), Mutex::new(MemStore::default())))
                .collect()
        } else {
            BTreeMap::new()
        };
        let next_sequence_id = AtomicU64::new(descriptor.open_sequence_id.next().as_u64());
        let stores = stores
            .into_iter()
            .map(|store| (store.family().to_string(), store))
            .collect();

        Replica {
            logger,
            descriptor,
            stores,
            memstores,
            file_system,
            read_only,
            closing: AtomicBool::new(false),
            next_sequence_id,
        }
    }

    pub fn descriptor(&self) -> &ReplicaDescriptor {
        &self.descriptor
    }

    pub fn key(&self) -> ReplicaKey {
        self.descriptor.key()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// From this point no new read or write is admitted. Reads already past the check finish
    /// against the snapshot they captured.
    pub(super) fn mark_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub fn stores(&self) -> Vec<Arc<Store>> {
        self.stores.values().cloned().collect()
    }

    pub fn store(&self, family: &str) -> Option<&Arc<Store>> {
        self.stores.get(family)
    }

    pub fn store_file_count(&self, family: &str) -> Option<usize> {
        self.stores.get(family).map(|store| store.file_count())
    }

    pub fn snapshot_version(&self, family: &str) -> Option<u64> {
        self.stores.get(family).map(|store| store.snapshot().version())
    }

    pub fn get(&self, family: &str, key: &[u8]) -> Result<Option<Bytes>, ReplicaReadError> {
        if self.is_closing() {
            return Err(ReplicaReadError::ReplicaClosed(self.key()));
        }
        if !self.descriptor.region.key_range.contains(key) {
            return Err(ReplicaReadError::KeyOutOfRange(self.key()));
        }
        let store = self
            .stores
            .get(family)
            .ok_or_else(|| ReplicaReadError::NoSuchFamily(family.to_string()))?;

        // Memory before files: a flush publishes its file before it forgets the flushed entries.
        if let Some(memstore) = self.memstores.get(family) {
            if let Some(value) = lock(memstore).get(key) {
                return Ok(Some(value));
            }
        }

        let snapshot = store.snapshot();
        Ok(snapshot.get(key)?)
    }

    pub fn put(&self, family: &str, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<(), WriteError> {
        self.check_writable()?;
        let key = key.into();
        if !self.descriptor.region.key_range.contains(&key) {
            return Err(WriteError::KeyOutOfRange(self.key()));
        }
        let memstore = self
            .memstores
            .get(family)
            .ok_or_else(|| WriteError::NoSuchFamily(family.to_string()))?;

        lock(memstore).put(key, value.into());
        Ok(())
    }

    /// Persist buffered writes of every family as one new store file per non-empty family.
    /// Returns the number of files written.
    pub async fn flush(&self) -> Result<usize, WriteError> {
        self.check_writable()?;

        let mut written = 0;
        for (family, store) in self.stores.iter() {
            if self.flush_store(family, store).await? {
                written += 1;
            }
        }

        Ok(written)
    }

    /// Rewrite all store files of every family into one file per family, then delete the
    /// superseded files. Returns the number of families compacted.
    pub async fn compact(&self) -> Result<usize, WriteError> {
        self.check_writable()?;

        let mut compacted = 0;
        for store in self.stores.values() {
            if self.compact_store(store).await? {
                compacted += 1;
            }
        }

        Ok(compacted)
    }

    fn check_writable(&self) -> Result<(), WriteError> {
        if self.read_only {
            return Err(WriteError::ReadOnly(self.key()));
        }
        if self.is_closing() {
            return Err(WriteError::ReplicaClosed(self.key()));
        }

        Ok(())
    }

    async fn flush_store(&self, family: &str, store: &Arc<Store>) -> Result<bool, WriteError> {
        let memstore = match self.memstores.get(family) {
            Some(memstore) => memstore,
            None => return Ok(false),
        };

        let permit = store.begin_refresh().await;
        self.check_writable()?;

        let entries = match lock(memstore).begin_flush() {
            Some(entries) => entries,
            None => return Ok(false),
        };
        let entry_count = entries.len();

        let current = store.snapshot();
        let sequence_id = self.allocate_sequence_id(&current);
        let reader = match self.persist(store, sequence_id, entries).await {
            Ok(reader) => reader,
            Err(e) => {
                lock(memstore).abort_flush();
                return Err(WriteError::Io(e));
            }
        };

        let meta = reader.meta().clone();
        let mut files = current.files().to_vec();
        files.push(Arc::new(reader));
        if store.publish(&permit, files).is_none() {
            lock(memstore).abort_flush();
            self.discard_unpublished(store, meta).await;
            return Err(WriteError::ReplicaClosed(self.key()));
        }
        lock(memstore).finish_flush();

        slog::info!(
            store.logger(),
            "Flushed {} entries into store file {:?}",
            entry_count,
            sequence_id
        );
        Ok(true)
    }

    async fn compact_store(&self, store: &Arc<Store>) -> Result<bool, WriteError> {
        let permit = store.begin_refresh().await;
        self.check_writable()?;

        let current = store.snapshot();
        if current.len() < 2 {
            return Ok(false);
        }

        let sequence_id = self.allocate_sequence_id(&current);
        let inputs = current.files().to_vec();
        let merged = {
            let inputs = inputs.clone();
            tokio::task::spawn_blocking(move || merge_newest_wins(&inputs))
                .await
                .map_err(join_error)??
        };
        let reader = self.persist(store, sequence_id, merged).await?;

        let meta = reader.meta().clone();
        if store.publish(&permit, vec![Arc::new(reader)]).is_none() {
            self.discard_unpublished(store, meta).await;
            return Err(WriteError::ReplicaClosed(self.key()));
        }
        drop(permit);

        // The superseded files are no longer referenced by the current snapshot. Deleting them
        // is what secondaries will observe on their next pass.
        let file_system = self.file_system.clone();
        let logger = store.logger().clone();
        let superseded: Vec<_> = inputs.iter().map(|file| file.meta().clone()).collect();
        let input_count = superseded.len();
        tokio::task::spawn_blocking(move || {
            for meta in superseded {
                if let Err(e) = file_system.remove(&meta) {
                    slog::warn!(logger, "Failed to remove compacted store file {:?}: {}", meta.path(), e);
                }
            }
        })
        .await
        .map_err(join_error)?;

        slog::info!(
            store.logger(),
            "Compacted {} store files into {:?}",
            input_count,
            sequence_id
        );
        Ok(true)
    }

    async fn persist(
        &self,
        store: &Store,
        sequence_id: SequenceId,
        entries: Vec<(Bytes, Bytes)>,
    ) -> io::Result<StoreFileReader> {
        let file_system = self.file_system.clone();
        let location = store.location().clone();
        let logger = store.logger().clone();

        tokio::task::spawn_blocking(move || {
            let meta = file_system.write(&location, sequence_id, &entries)?;
            match file_system.open(&logger, &meta) {
                Ok(OpenOutcome::Opened(reader)) => Ok(reader),
                Ok(OpenOutcome::Vanished) => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("store file {:?} vanished right after it was written", meta.path()),
                )),
                Err(OpenFileError::Io { source, .. }) => Err(source),
            }
        })
        .await
        .map_err(join_error)?
    }

    /// Removes a file that was written but never made it into a snapshot, so secondaries don't
    /// pick it up.
    async fn discard_unpublished(&self, store: &Store, meta: StoreFileMeta) {
        let file_system = self.file_system.clone();
        let logger = store.logger().clone();
        let removed = tokio::task::spawn_blocking(move || {
            if let Err(e) = file_system.remove(&meta) {
                slog::warn!(logger, "Failed to remove unpublished store file {:?}: {}", meta.path(), e);
            }
        })
        .await;
        if let Err(e) = removed {
            slog::warn!(store.logger(), "Removal of unpublished store file did not finish: {}", e);
        }
    }

    fn allocate_sequence_id(&self, current: &FileSetSnapshot) -> SequenceId {
        let floor = current
            .files()
            .first()
            .map_or(0, |newest| newest.sequence_id().next().as_u64());
        self.next_sequence_id.fetch_max(floor, Ordering::AcqRel);

        SequenceId::new(self.next_sequence_id.fetch_add(1, Ordering::AcqRel))
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        let unflushed: usize = self.memstores.values().map(|memstore| lock(memstore).len()).sum();
        if unflushed > 0 {
            slog::warn!(self.logger, "Dropping replica with {} unflushed entries", unflushed);
        }
    }
}

fn lock(memstore: &Mutex<MemStore>) -> MutexGuard<'_, MemStore> {
    memstore.lock().expect("Replica.memstore mutex guard poison")
}

fn join_error(e: tokio::task::JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// `files` is newest first, so apply oldest first and let later files overwrite.
fn merge_newest_wins(files: &[Arc<StoreFileReader>]) -> io::Result<Vec<(Bytes, Bytes)>> {
    let mut merged = BTreeMap::new();
    for file in files.iter().rev() {
        for (key, value) in file.entries()? {
            merged.insert(key, value);
        }
    }

    Ok(merged.into_iter().collect())
}
