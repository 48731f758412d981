use bytes::Bytes;
use std::collections::BTreeMap;

/// Unflushed writes of one family on a primary.
///
/// A flush moves `active` into `flushing` and only drops `flushing` once the new store file is
/// published. Lookups check both, so a key is visible in memory until it is visible in a file.
#[derive(Default)]
pub(super) struct MemStore {
    active: BTreeMap<Bytes, Bytes>,
    flushing: Option<BTreeMap<Bytes, Bytes>>,
}

impl MemStore {
    pub fn put(&mut self, key: Bytes, value: Bytes) {
        self.active.insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.active
            .get(key)
            .or_else(|| self.flushing.as_ref().and_then(|flushing| flushing.get(key)))
            .cloned()
    }

    /// Returns the entries to persist, or `None` if there is nothing to flush or another flush
    /// has not finished.
    pub fn begin_flush(&mut self) -> Option<Vec<(Bytes, Bytes)>> {
        if self.active.is_empty() || self.flushing.is_some() {
            return None;
        }

        let entries = std::mem::take(&mut self.active);
        let snapshot = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.flushing = Some(entries);
        Some(snapshot)
    }

    pub fn finish_flush(&mut self) {
        self.flushing = None;
    }

    /// Put the entries of a failed flush back. Writes that arrived since take precedence.
    pub fn abort_flush(&mut self) {
        if let Some(flushing) = self.flushing.take() {
            for (key, value) in flushing {
                self.active.entry(key).or_insert(value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.flushing.as_ref().map_or(0, |flushing| flushing.len())
    }
}
