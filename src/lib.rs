//! feed-pinner - keeps feeds on a peer-to-peer append-only-log network pinned
//!
//! Clients register a feed's public key; the node opens a live subscription
//! to it, persists the newest record it has seen, and answers queries for
//! that record over HTTP.
//!
//! ## Architecture
//!
//! - **Snapshot store**: durable `pins.<key>` → record mapping (sled)
//! - **Feed network**: per-key handles on the DHT (libp2p Kademlia)
//! - **Pin manager**: subscription table, setup/reconcile, update bridges
//! - **HTTP API**: thin axum adapters over the pin manager
//!
//! ## Storage Layout
//!
//! ```text
//! <data_dir>/
//! ├── pins.sled/    # Snapshot database
//! └── node_key      # libp2p identity keypair
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod network;
pub mod pins;
pub mod snapshot;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{PinError, Result};
pub use network::{DhtNetwork, FeedHandle, FeedNetwork, MemoryNetwork};
pub use pins::{PinEntry, PinManager, PinManagerConfig, ReconcileReport};
pub use snapshot::{MemorySnapshotStore, SledSnapshotStore, SnapshotStore};
pub use types::{PublicKey, Record};
