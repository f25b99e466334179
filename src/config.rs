//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pins: PinsConfig,
    #[serde(default)]
    pub p2p: P2PConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory (snapshot database and node identity)
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address the HTTP API binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Bearer tokens accepted by `POST /pin/`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinsConfig {
    /// Upper bound on opening a feed and waiting for it to become ready
    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,

    /// How often to re-run reconciliation so failed keys get retried (0 = startup only)
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2PConfig {
    /// Listen addresses
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: Vec<String>,

    /// Bootstrap nodes for peer discovery
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,

    /// Enable mDNS discovery
    #[serde(default = "default_true")]
    pub mdns_enabled: bool,

    /// Interval between DHT lookups for each pinned feed
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Kademlia query timeout
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

/// Floor for `p2p.poll_interval_ms`
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

// Defaults
fn default_bind_addr() -> String { "0.0.0.0".to_string() }
fn default_http_port() -> u16 { 3000 }
fn default_open_timeout() -> u64 { 30 }
fn default_reconcile_interval() -> u64 { 300 }
fn default_true() -> bool { true }
fn default_listen_addrs() -> Vec<String> {
    vec!["/ip4/0.0.0.0/tcp/4001".to_string()]
}
fn default_poll_interval() -> u64 { 5000 }
fn default_query_timeout() -> u64 { 20 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_port: default_http_port(),
        }
    }
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            open_timeout_secs: default_open_timeout(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            listen_addrs: default_listen_addrs(),
            bootstrap_nodes: vec![],
            mdns_enabled: true,
            poll_interval_ms: default_poll_interval(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                data_dir: PathBuf::from(".data/feed-pinner"),
            },
            api: ApiConfig::default(),
            auth: AuthConfig::default(),
            pins: PinsConfig::default(),
            p2p: P2PConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Snapshot database path
    pub fn snapshot_db_path(&self) -> PathBuf {
        self.node.data_dir.join("pins.sled")
    }
}

impl PinsConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

impl P2PConfig {
    /// Poll period, never below `MIN_POLL_INTERVAL_MS`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
