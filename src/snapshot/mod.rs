//! Snapshot store - durable mapping of pinned key to last seen record
//!
//! Read in full once at startup to drive reconciliation, then written per
//! key on every setup and every network update. Entries are `Option<Record>`
//! because a feed can be pinned before anything has been published on it.

pub mod memory;
pub mod sled_store;

pub use memory::MemorySnapshotStore;
pub use sled_store::SledSnapshotStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{PublicKey, Record};

/// Prefix for persisted snapshot keys (`pins.<hex>`)
pub const PIN_KEY_PREFIX: &str = "pins.";

/// Trait for snapshot persistence (allows different backends)
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Every persisted pin, ordered by key
    async fn read_all(&self) -> Result<Vec<(PublicKey, Option<Record>)>>;

    /// The persisted record for one key (`None` if absent or never published)
    async fn read(&self, key: &PublicKey) -> Result<Option<Record>>;

    /// Atomically replace the entry for one key
    async fn write(&self, key: &PublicKey, record: Option<&Record>) -> Result<()>;
}

/// Storage key for a pin
pub fn pin_key(key: &PublicKey) -> String {
    format!("{}{}", PIN_KEY_PREFIX, key)
}

/// Inverse of [`pin_key`]; `None` for foreign or malformed entries
pub fn parse_pin_key(raw: &str) -> Option<PublicKey> {
    raw.strip_prefix(PIN_KEY_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_key_round_trip() {
        let key = PublicKey::from_bytes([7u8; 32]);
        let raw = pin_key(&key);

        assert!(raw.starts_with("pins."));
        assert_eq!(parse_pin_key(&raw), Some(key));
    }

    #[test]
    fn test_parse_pin_key_rejects_foreign_entries() {
        assert_eq!(parse_pin_key("config.port"), None);
        assert_eq!(parse_pin_key("pins.not-a-key"), None);
    }
}
