//! sled-backed snapshot store

use std::path::Path;

use async_trait::async_trait;
use sled::Db;
use tracing::{info, warn};

use super::{parse_pin_key, pin_key, SnapshotStore};
use crate::error::Result;
use crate::types::{PublicKey, Record};

/// Durable snapshot store
pub struct SledSnapshotStore {
    db: Db,
}

impl SledSnapshotStore {
    /// Open or create the snapshot database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), pins = db.len(), "Opened snapshot database");
        Ok(Self { db })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SledSnapshotStore {
    async fn read_all(&self) -> Result<Vec<(PublicKey, Option<Record>)>> {
        let mut pins = Vec::new();
        for item in self.db.scan_prefix(super::PIN_KEY_PREFIX) {
            let (raw_key, value) = item?;
            let Some(key) = std::str::from_utf8(&raw_key).ok().and_then(parse_pin_key) else {
                warn!(raw_key = %String::from_utf8_lossy(&raw_key), "Skipping malformed snapshot key");
                continue;
            };
            // an unreadable value still names a pinned key; setup rewrites it
            let record = match serde_json::from_slice::<Option<Record>>(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "Undecodable snapshot value, treating as absent");
                    None
                }
            };
            pins.push((key, record));
        }
        // scan_prefix yields hex order, which is already byte order
        Ok(pins)
    }

    async fn read(&self, key: &PublicKey) -> Result<Option<Record>> {
        match self.db.get(pin_key(key).as_bytes())? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &PublicKey, record: Option<&Record>) -> Result<()> {
        let value = serde_json::to_vec(&record)?;
        self.db.insert(pin_key(key).as_bytes(), value)?;
        self.db.flush_async().await?;
        Ok(())
    }
}
