//! In-process feed network
//!
//! Every node in the process shares one map of feeds, so `publish` on the
//! network is seen by every handle opened for that key. Used by the tests
//! and for running the API without a swarm.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::{FeedHandle, FeedNetwork, UPDATE_CHANNEL_CAPACITY};
use crate::error::{PinError, Result};
use crate::types::{PublicKey, Record};

/// A feed held in process memory
pub struct MemoryFeed {
    key: PublicKey,
    latest: watch::Sender<Option<Record>>,
    updates: broadcast::Sender<Record>,
    ready_delay: Duration,
}

impl MemoryFeed {
    fn new(key: PublicKey, ready_delay: Duration) -> Self {
        let (latest, _) = watch::channel(None);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            key,
            latest,
            updates,
            ready_delay,
        }
    }

    fn publish(&self, record: Record) {
        self.latest.send_replace(Some(record.clone()));
        // No receivers is fine: nobody is listening yet
        let _ = self.updates.send(record);
    }
}

#[async_trait]
impl FeedHandle for MemoryFeed {
    fn key(&self) -> &PublicKey {
        &self.key
    }

    async fn ready(&self) -> Result<()> {
        if !self.ready_delay.is_zero() {
            tokio::time::sleep(self.ready_delay).await;
        }
        Ok(())
    }

    fn latest(&self) -> Option<Record> {
        self.latest.borrow().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.updates.subscribe()
    }
}

/// In-process network with failure injection and open counters
#[derive(Default)]
pub struct MemoryNetwork {
    feeds: DashMap<PublicKey, Arc<MemoryFeed>>,
    opens: DashMap<PublicKey, usize>,
    unreachable: DashMap<PublicKey, ()>,
    total_opens: AtomicUsize,
    ready_delay: Duration,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `ready()` call, to widen race windows in tests
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    fn feed(&self, key: &PublicKey) -> Arc<MemoryFeed> {
        self.feeds
            .entry(*key)
            .or_insert_with(|| Arc::new(MemoryFeed::new(*key, self.ready_delay)))
            .clone()
    }

    /// Append a record to a feed and notify its subscribers
    pub fn publish(&self, key: &PublicKey, record: Record) {
        debug!(key = %key, timestamp = %record.timestamp, "Publishing record");
        self.feed(key).publish(record);
    }

    /// Make `open` fail for a key until `restore` is called
    pub fn make_unreachable(&self, key: &PublicKey) {
        self.unreachable.insert(*key, ());
    }

    pub fn restore(&self, key: &PublicKey) {
        self.unreachable.remove(key);
    }

    /// How many times `open` succeeded for a key
    pub fn open_count(&self, key: &PublicKey) -> usize {
        self.opens.get(key).map(|n| *n).unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.total_opens.load(Ordering::SeqCst)
    }

    /// Live update subscribers on a feed
    pub fn subscriber_count(&self, key: &PublicKey) -> usize {
        self.feeds
            .get(key)
            .map(|feed| feed.updates.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeedNetwork for MemoryNetwork {
    async fn open(&self, key: &PublicKey) -> Result<Arc<dyn FeedHandle>> {
        if self.unreachable.contains_key(key) {
            return Err(PinError::network(key, "feed unreachable"));
        }

        *self.opens.entry(*key).or_insert(0) += 1;
        self.total_opens.fetch_add(1, Ordering::SeqCst);

        let handle: Arc<dyn FeedHandle> = self.feed(key);
        Ok(handle)
    }
}
