use crate::storefile::codec;
use crate::storefile::codec::ValuePosition;
use crate::storefile::StoreFileMeta;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// SequenceId orders store files. The primary assigns them monotonically, so a higher sequence id
/// always holds newer data than a lower one.
#[derive(Copy, Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SequenceId(u64);

impl SequenceId {
    pub fn new(id: u64) -> Self {
        SequenceId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        SequenceId(self.0 + 1)
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// StoreFileReader is an open read handle on one store file. The key index is loaded into memory
/// on open, values are read on demand through the held file descriptor. Reads are positional, so
/// concurrent readers of one file do not contend.
///
/// The descriptor stays valid after the primary unlinks the file, so a reader that is still
/// referenced by some snapshot keeps serving reads until the last reference drops.
pub struct StoreFileReader {
    logger: slog::Logger,
    meta: StoreFileMeta,
    index: BTreeMap<Bytes, ValuePosition>,
    file: File,
}

impl StoreFileReader {
    /// Returns the raw io error so the caller can tell a vanished file apart from anything else.
    pub(super) fn open(logger: slog::Logger, meta: StoreFileMeta) -> io::Result<Self> {
        let file = File::open(meta.path())?;
        let mut buffered = BufReader::new(file);

        let header = codec::read_header(&mut buffered)?;
        if header.sequence_id != meta.sequence_id().as_u64() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "store file sequence id {} does not match its name {:?}",
                    header.sequence_id,
                    meta.sequence_id()
                ),
            ));
        }
        let index = codec::read_index(&mut buffered, &header)?;

        slog::debug!(logger, "Opened store file {:?} with {} entries", meta.path(), index.len());

        Ok(StoreFileReader {
            logger,
            meta,
            index,
            file: buffered.into_inner(),
        })
    }

    pub fn meta(&self) -> &StoreFileMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        self.meta.path()
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.meta.sequence_id()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> io::Result<Option<Bytes>> {
        match self.index.get(key) {
            Some(position) => self.read_value(*position).map(Some),
            None => Ok(None),
        }
    }

    /// All entries in key order. Used by compaction to rewrite files.
    pub fn entries(&self) -> io::Result<Vec<(Bytes, Bytes)>> {
        let mut entries = Vec::with_capacity(self.index.len());
        for (key, position) in self.index.iter() {
            entries.push((key.clone(), self.read_value(*position)?));
        }

        Ok(entries)
    }

    fn read_value(&self, position: ValuePosition) -> io::Result<Bytes> {
        let mut value = vec![0u8; position.len as usize];
        self.file.read_exact_at(&mut value, position.offset)?;

        Ok(Bytes::from(value))
    }
}

impl fmt::Debug for StoreFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreFileReader")
            .field("path", &self.meta.path())
            .field("sequence_id", &self.meta.sequence_id())
            .field("entries", &self.index.len())
            .finish()
    }
}

impl Drop for StoreFileReader {
    fn drop(&mut self) {
        slog::debug!(self.logger, "Released store file {:?}", self.meta.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn concurrent_gets_read_their_own_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("00000000000000000003.sf");
        let entries: Vec<(Bytes, Bytes)> = (0..100)
            .map(|i| (Bytes::from(format!("k{:03}", i)), Bytes::from(format!("value-{}", i))))
            .collect();
        let mut file = File::create(&path).unwrap();
        codec::write_store_file(&mut file, 3, &entries).unwrap();
        drop(file);

        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let reader = Arc::new(StoreFileReader::open(logger, StoreFileMeta::new(path.clone(), SequenceId::new(3))).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let reader = reader.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        let i = (t * 31 + round * 7) % 100;
                        let value = reader.get(format!("k{:03}", i).as_bytes()).unwrap();
                        assert_eq!(value, Some(Bytes::from(format!("value-{}", i))));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(reader.entries().unwrap(), entries);
    }
}
