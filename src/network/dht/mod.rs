//! Kademlia-backed feed network
//!
//! A feed's newest record is stored in the DHT under the raw public key
//! bytes, JSON-encoded. Each opened feed looks itself up once to become
//! ready, then re-queries on a fixed interval and broadcasts every record
//! that is strictly newer than the one it holds.

pub mod swarm;

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use libp2p::PeerId;
use tokio::sync::{broadcast, mpsc, oneshot, watch, OnceCell};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use self::swarm::DhtCommand;
use super::{FeedHandle, FeedNetwork, UPDATE_CHANNEL_CAPACITY};
use crate::config::P2PConfig;
use crate::error::{PinError, Result};
use crate::types::{PublicKey, Record};

/// Feed network backed by a libp2p swarm
pub struct DhtNetwork {
    commands: mpsc::Sender<DhtCommand>,
    local_peer_id: PeerId,
    poll_interval: Duration,
}

impl DhtNetwork {
    /// Build the swarm and spawn its event loop
    pub fn start(config: &P2PConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let swarm = swarm::build_swarm(config, data_dir)?;
        let local_peer_id = *swarm.local_peer_id();

        let (commands, command_rx) = mpsc::channel(256);
        tokio::spawn(swarm::run(swarm, command_rx));
        info!(peer_id = %local_peer_id, "DHT network started");

        Ok(Self {
            commands,
            local_peer_id,
            poll_interval: config.poll_interval(),
        })
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }
}

#[async_trait]
impl FeedNetwork for DhtNetwork {
    async fn open(&self, key: &PublicKey) -> Result<Arc<dyn FeedHandle>> {
        if self.commands.is_closed() {
            return Err(PinError::network(key, "swarm is not running"));
        }
        let feed: Arc<dyn FeedHandle> =
            Arc::new(DhtFeed::new(*key, self.commands.clone(), self.poll_interval));
        Ok(feed)
    }
}

/// State shared between a feed handle and its poll task
struct FeedState {
    key: PublicKey,
    commands: mpsc::Sender<DhtCommand>,
    latest: watch::Sender<Option<Record>>,
    updates: broadcast::Sender<Record>,
}

impl FeedState {
    async fn lookup(&self) -> Result<Option<Record>> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(DhtCommand::GetRecord {
                key: self.key,
                reply,
            })
            .await
            .map_err(|_| PinError::network(self.key, "swarm stopped"))?;
        reply_rx
            .await
            .map_err(|_| PinError::network(self.key, "swarm dropped the lookup"))
    }

    /// Take the record if it is newer than the current one; returns whether it was taken
    fn offer(&self, record: Record) -> bool {
        let advanced = self.latest.send_if_modified(|current| {
            let newer = current
                .as_ref()
                .map_or(true, |existing| record.is_newer_than(existing));
            if newer {
                *current = Some(record.clone());
            }
            newer
        });
        if advanced {
            let _ = self.updates.send(record);
        }
        advanced
    }
}

/// Handle on one feed in the DHT
pub struct DhtFeed {
    state: Arc<FeedState>,
    started: OnceCell<()>,
    poll_interval: Duration,
}

impl DhtFeed {
    fn new(key: PublicKey, commands: mpsc::Sender<DhtCommand>, poll_interval: Duration) -> Self {
        let (latest, _) = watch::channel(None);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(FeedState {
                key,
                commands,
                latest,
                updates,
            }),
            started: OnceCell::new(),
            poll_interval,
        }
    }
}

#[async_trait]
impl FeedHandle for DhtFeed {
    fn key(&self) -> &PublicKey {
        &self.state.key
    }

    async fn ready(&self) -> Result<()> {
        self.started
            .get_or_try_init(|| async {
                if let Some(record) = self.state.lookup().await? {
                    self.state.offer(record);
                }
                tokio::spawn(poll(Arc::downgrade(&self.state), self.poll_interval));
                debug!(key = %self.state.key, "Feed ready");
                Ok::<_, PinError>(())
            })
            .await?;
        Ok(())
    }

    fn latest(&self) -> Option<Record> {
        self.state.latest.borrow().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.state.updates.subscribe()
    }
}

/// Re-query the feed until its handle is dropped or the swarm stops
async fn poll(state: Weak<FeedState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick fires immediately and ready() has just looked the feed up
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else {
            break;
        };

        match state.lookup().await {
            Ok(Some(record)) => {
                let timestamp = record.timestamp;
                if state.offer(record) {
                    debug!(key = %state.key, %timestamp, "Newer record found");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(key = %state.key, error = %e, "Stopping feed poll");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(secs: u32, text: &str) -> Record {
        Record::new(Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, secs).unwrap(), text)
    }

    fn feed() -> (DhtFeed, mpsc::Receiver<DhtCommand>) {
        let (commands, command_rx) = mpsc::channel(8);
        let feed = DhtFeed::new(PublicKey::from_bytes([5u8; 32]), commands, Duration::from_secs(3600));
        (feed, command_rx)
    }

    #[tokio::test]
    async fn test_offer_only_advances() {
        let (feed, _rx) = feed();
        let mut updates = feed.subscribe();

        assert!(feed.state.offer(record(5, "b")));
        assert!(!feed.state.offer(record(1, "a")));
        assert!(!feed.state.offer(record(5, "b")));
        assert!(feed.state.offer(record(9, "c")));

        assert_eq!(updates.recv().await.unwrap().text, "b");
        assert_eq!(updates.recv().await.unwrap().text, "c");
        assert_eq!(feed.latest().unwrap().text, "c");
    }

    #[tokio::test]
    async fn test_ready_takes_lookup_result() {
        let (feed, mut command_rx) = feed();

        let responder = tokio::spawn(async move {
            if let Some(DhtCommand::GetRecord { reply, .. }) = command_rx.recv().await {
                let _ = reply.send(Some(record(3, "found")));
            }
            command_rx
        });

        feed.ready().await.unwrap();
        assert_eq!(feed.latest().unwrap().text, "found");
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_ready_fails_when_swarm_is_gone() {
        let (feed, command_rx) = feed();
        drop(command_rx);

        let err = feed.ready().await.unwrap_err();
        assert!(matches!(err, PinError::NetworkUnavailable { .. }));
        assert!(feed.latest().is_none());
    }
}
