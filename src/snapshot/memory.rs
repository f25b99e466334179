//! In-memory snapshot store

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::SnapshotStore;
use crate::error::Result;
use crate::types::{PublicKey, Record};

/// Snapshot store kept in process memory.
///
/// Counts writes per key so callers can check that each network update is
/// persisted exactly once.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: DashMap<PublicKey, Option<Record>>,
    writes: DashMap<PublicKey, usize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed entries without counting them as writes
    pub fn with_entries(entries: impl IntoIterator<Item = (PublicKey, Option<Record>)>) -> Self {
        let store = Self::new();
        for (key, record) in entries {
            store.entries.insert(key, record);
        }
        store
    }

    /// Number of `write` calls seen for a key
    pub fn write_count(&self, key: &PublicKey) -> usize {
        self.writes.get(key).map(|n| *n).unwrap_or(0)
    }

    /// Whether the key has an entry at all (null entries included)
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn snapshot(&self) -> HashMap<PublicKey, Option<Record>> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn read_all(&self) -> Result<Vec<(PublicKey, Option<Record>)>> {
        let mut pins: Vec<_> = self.snapshot().into_iter().collect();
        pins.sort_by_key(|(key, _)| *key);
        Ok(pins)
    }

    async fn read(&self, key: &PublicKey) -> Result<Option<Record>> {
        Ok(self.entries.get(key).and_then(|entry| entry.value().clone()))
    }

    async fn write(&self, key: &PublicKey, record: Option<&Record>) -> Result<()> {
        self.entries.insert(*key, record.cloned());
        *self.writes.entry(*key).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_write_counts() {
        let store = MemorySnapshotStore::new();
        let key = PublicKey::from_bytes([3u8; 32]);
        let record = Record::new(Utc::now(), "x");

        assert_eq!(store.write_count(&key), 0);
        store.write(&key, Some(&record)).await.unwrap();
        store.write(&key, Some(&record)).await.unwrap();

        assert_eq!(store.write_count(&key), 2);
        assert_eq!(store.read(&key).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_seeded_entries_are_not_writes() {
        let key = PublicKey::from_bytes([4u8; 32]);
        let store = MemorySnapshotStore::with_entries([(key, None)]);

        assert!(store.contains(&key));
        assert_eq!(store.write_count(&key), 0);
        assert_eq!(store.read_all().await.unwrap(), vec![(key, None)]);
    }
}
