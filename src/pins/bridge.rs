//! Update bridge - network notifications into snapshot writes
//!
//! One task per subscribed key. Every notification triggers one snapshot
//! write of the handle's current record, applied in delivery order under
//! the key's lock.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::PinManager;
use crate::network::FeedHandle;
use crate::types::PublicKey;

/// Subscribe to the handle and spawn the bridge task.
///
/// The receiver is created before this returns, so no notification sent
/// after attach can be missed.
pub(crate) fn attach(manager: PinManager, key: PublicKey, handle: Arc<dyn FeedHandle>) -> JoinHandle<()> {
    let mut updates = handle.subscribe();
    let attached_at = Utc::now();
    debug!(key = %key, "Update bridge attached");

    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    // lag is informational only
                    let lag = Utc::now().signed_duration_since(update.timestamp);
                    debug!(
                        key = %key,
                        timestamp = %update.timestamp,
                        lag_secs = lag.num_seconds(),
                        attached_at = %attached_at,
                        "Update received"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(key = %key, skipped, "Update bridge lagged, persisting current record");
                }
                Err(RecvError::Closed) => {
                    info!(key = %key, "Feed closed, update bridge stopping");
                    break;
                }
            }

            if let Err(e) = manager.persist_update(&key, handle.as_ref()).await {
                error!(key = %key, error = %e, "Failed to persist update");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{MemoryNetwork, UPDATE_CHANNEL_CAPACITY};
    use crate::pins::PinManagerConfig;
    use crate::snapshot::{MemorySnapshotStore, SnapshotStore};
    use crate::types::Record;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    async fn wait_for_writes(store: &MemorySnapshotStore, key: &PublicKey, writes: usize) {
        for _ in 0..200 {
            if store.write_count(key) >= writes {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_lagged_bridge_ends_at_newest_record() {
        let store = Arc::new(MemorySnapshotStore::new());
        let network = Arc::new(MemoryNetwork::new());
        let key = PublicKey::from_bytes([0x31; 32]);

        let pins = PinManager::new(PinManagerConfig::default(), store.clone(), network.clone());
        pins.setup(key).await.unwrap();

        // the bridge can't run until this loop yields, so its receiver overflows
        let published = UPDATE_CHANNEL_CAPACITY + 44;
        for i in 0..published {
            network.publish(&key, Record::new(at(i as i64), format!("r{}", i)));
        }

        // setup, one write for the lag, then one per buffered notification
        let expected = 1 + 1 + UPDATE_CHANNEL_CAPACITY;
        wait_for_writes(&store, &key, expected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.write_count(&key), expected);
        let newest = Record::new(at(published as i64 - 1), format!("r{}", published - 1));
        assert_eq!(store.read(&key).await.unwrap(), Some(newest));
        assert_eq!(pins.stats().await.regressions, 0);
    }

    #[tokio::test]
    async fn test_older_update_is_counted_and_still_written() {
        let store = Arc::new(MemorySnapshotStore::new());
        let network = Arc::new(MemoryNetwork::new());
        let key = PublicKey::from_bytes([0x32; 32]);
        network.publish(&key, Record::new(at(10), "newer"));

        let pins = PinManager::new(PinManagerConfig::default(), store.clone(), network.clone());
        pins.setup(key).await.unwrap();
        assert_eq!(pins.stats().await.regressions, 0);

        network.publish(&key, Record::new(at(5), "older"));
        wait_for_writes(&store, &key, 2).await;

        assert_eq!(store.write_count(&key), 2);
        assert_eq!(pins.stats().await.regressions, 1);
        assert_eq!(store.read(&key).await.unwrap(), Some(Record::new(at(5), "older")));
    }
}
