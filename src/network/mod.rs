//! Network capability - per-feed handles on the peer-to-peer network
//!
//! The pin manager only sees these traits:
//! - `FeedNetwork::open` hands out a handle for one public key
//! - `FeedHandle::ready` resolves once the handle can answer `latest`
//! - `FeedHandle::subscribe` delivers a notification per newer record
//!
//! Record replication and signature checks live behind the trait.

pub mod dht;
pub mod memory;

pub use dht::{DhtNetwork, DhtFeed};
pub use memory::{MemoryFeed, MemoryNetwork};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{PublicKey, Record};

/// Buffered update notifications per subscriber before it counts as lagging
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Trait for opening feeds (allows mocking in tests)
#[async_trait]
pub trait FeedNetwork: Send + Sync {
    async fn open(&self, key: &PublicKey) -> Result<Arc<dyn FeedHandle>>;
}

/// A live connection to one feed
#[async_trait]
pub trait FeedHandle: Send + Sync {
    fn key(&self) -> &PublicKey;

    /// Wait until the handle has a view of the feed
    async fn ready(&self) -> Result<()>;

    /// Most recent record delivered by the network, if any
    fn latest(&self) -> Option<Record>;

    /// Receive one notification per newer record, in delivery order
    fn subscribe(&self) -> broadcast::Receiver<Record>;
}
