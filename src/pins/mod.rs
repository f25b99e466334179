//! Pin lifecycle - subscribing feeds and keeping their snapshots current
//!
//! `PinManager` is the single entry point:
//! - `setup` onboards a key (idempotent, one handle and one bridge per key)
//! - `reconcile` restores every persisted pin at startup
//! - `latest` / `list_all` answer queries from the live handles
//!
//! Every step that touches one key runs under that key's lock, so concurrent
//! `setup` calls and bridge writes for the same key are serialised while
//! different keys proceed independently.

pub mod bridge;
pub mod table;

pub use table::{Subscription, SubscriptionTable};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{PinError, Result};
use crate::network::{FeedHandle, FeedNetwork};
use crate::snapshot::SnapshotStore;
use crate::types::{PublicKey, Record};

/// Pin manager settings
#[derive(Debug, Clone)]
pub struct PinManagerConfig {
    /// Bound on open + ready for one key
    pub open_timeout: Duration,
}

impl Default for PinManagerConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// One row of the pin listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinEntry {
    pub key: PublicKey,
    pub latest: Option<Record>,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    /// Keys subscribed by this pass
    pub restored: Vec<PublicKey>,
    /// Keys that were already subscribed and left alone
    pub already_pinned: Vec<PublicKey>,
    /// Keys whose setup failed, with the reason
    pub failed: Vec<(PublicKey, String)>,
}

/// Counters for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PinStats {
    pub pins: usize,
    pub listening: usize,
    pub regressions: u64,
}

struct Inner {
    config: PinManagerConfig,
    table: RwLock<SubscriptionTable>,
    key_locks: DashMap<PublicKey, Arc<Mutex<()>>>,
    bridges: DashMap<PublicKey, JoinHandle<()>>,
    store: Arc<dyn SnapshotStore>,
    network: Arc<dyn FeedNetwork>,
    regressions: AtomicU64,
}

/// Owner of the subscription table and the snapshot writes
#[derive(Clone)]
pub struct PinManager {
    inner: Arc<Inner>,
}

impl PinManager {
    pub fn new(
        config: PinManagerConfig,
        store: Arc<dyn SnapshotStore>,
        network: Arc<dyn FeedNetwork>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                table: RwLock::new(SubscriptionTable::new()),
                key_locks: DashMap::new(),
                bridges: DashMap::new(),
                store,
                network,
                regressions: AtomicU64::new(0),
            }),
        }
    }

    fn key_lock(&self, key: &PublicKey) -> Arc<Mutex<()>> {
        self.inner.key_locks.entry(*key).or_default().clone()
    }

    /// Subscribe a key (or reuse its subscription) and return its current record.
    ///
    /// Safe to call any number of times, concurrently, for the same key: the
    /// feed is opened once and its update bridge attached once. Nothing is
    /// registered unless the handle became ready within the open timeout.
    pub async fn setup(&self, key: PublicKey) -> Result<Option<Record>> {
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let existing = self.inner.table.read().await.get(&key).ok();
        let handle = match existing {
            Some(handle) => {
                debug!(key = %key, "Reusing existing subscription");
                handle
            }
            None => {
                let handle = self.open_ready(&key).await?;
                self.inner
                    .table
                    .write()
                    .await
                    .register(key, Arc::clone(&handle))?;
                handle
            }
        };

        let attach = self.inner.table.write().await.mark_listening(&key)?;
        if attach {
            let task = bridge::attach(self.clone(), key, Arc::clone(&handle));
            self.inner.bridges.insert(key, task);
        }

        self.persist_current(&key, handle.as_ref()).await?;

        let pins = self.inner.table.read().await.len();
        info!(key = %key, pins, "Setup complete");
        Ok(handle.latest())
    }

    async fn open_ready(&self, key: &PublicKey) -> Result<Arc<dyn FeedHandle>> {
        let timeout = self.inner.config.open_timeout;
        let opening = async {
            let handle = self.inner.network.open(key).await?;
            handle.ready().await?;
            Ok::<_, PinError>(handle)
        };

        match tokio::time::timeout(timeout, opening).await {
            Ok(result) => result,
            Err(_) => Err(PinError::network(
                key,
                format!("not ready after {}s", timeout.as_secs_f32()),
            )),
        }
    }

    /// Bridge entry point: persist the handle's record under the key's lock
    pub(crate) async fn persist_update(&self, key: &PublicKey, handle: &dyn FeedHandle) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.persist_current(key, handle).await
    }

    /// Write the handle's current record. Caller holds the key lock.
    ///
    /// The write is unconditional; the regression check only reports.
    async fn persist_current(&self, key: &PublicKey, handle: &dyn FeedHandle) -> Result<()> {
        let current = handle.latest();

        if let Some(new) = &current {
            self.check_regression(key, new).await;
        }

        self.inner.store.write(key, current.as_ref()).await?;
        debug!(key = %key, has_record = current.is_some(), "Snapshot written");
        Ok(())
    }

    async fn check_regression(&self, key: &PublicKey, incoming: &Record) {
        match self.inner.store.read(key).await {
            Ok(Some(previous)) if previous.is_newer_than(incoming) => {
                self.inner.regressions.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %key,
                    previous = %previous.timestamp,
                    incoming = %incoming.timestamp,
                    "Snapshot timestamp regression"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Previous snapshot unreadable, overwriting");
            }
        }
    }

    /// Subscribe every persisted key that isn't subscribed yet.
    ///
    /// Keys are set up concurrently; a failure is logged and reported for
    /// that key only.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let persisted = self.inner.store.read_all().await?;
        let mut report = ReconcileReport::default();
        let mut pending = JoinSet::new();

        for (key, _) in persisted {
            if self.is_pinned(&key).await {
                report.already_pinned.push(key);
                continue;
            }
            let manager = self.clone();
            pending.spawn(async move {
                let result = manager.setup(key).await;
                (key, result)
            });
        }

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((key, Ok(_))) => report.restored.push(key),
                Ok((key, Err(e))) => {
                    warn!(key = %key, error = %e, "Failed to restore pin");
                    report.failed.push((key, e.to_string()));
                }
                Err(e) => error!(error = %e, "Reconcile task panicked"),
            }
        }

        report.restored.sort();
        report.failed.sort_by_key(|(key, _)| *key);
        info!(
            restored = report.restored.len(),
            already_pinned = report.already_pinned.len(),
            failed = report.failed.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Re-run `reconcile` on an interval so keys that failed get retried
    pub fn spawn_reconcile_loop(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // startup reconcile runs separately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = manager.reconcile().await {
                    error!(error = %e, "Periodic reconciliation failed");
                }
            }
        })
    }

    pub async fn is_pinned(&self, key: &PublicKey) -> bool {
        self.inner.table.read().await.has(key)
    }

    /// Current in-memory record for a subscribed key
    pub async fn latest(&self, key: &PublicKey) -> Result<Option<Record>> {
        let handle = self.inner.table.read().await.get(key)?;
        Ok(handle.latest())
    }

    /// Every subscribed key with its current record, in key order
    pub async fn list_all(&self) -> Vec<PinEntry> {
        self.inner
            .table
            .read()
            .await
            .all()
            .map(|(key, handle)| PinEntry {
                key: *key,
                latest: handle.latest(),
            })
            .collect()
    }

    pub async fn stats(&self) -> PinStats {
        let table = self.inner.table.read().await;
        PinStats {
            pins: table.len(),
            listening: table.listening_count(),
            regressions: self.inner.regressions.load(Ordering::Relaxed),
        }
    }

    /// Stop every update bridge
    pub fn shutdown(&self) {
        for entry in self.inner.bridges.iter() {
            entry.value().abort();
        }
        self.inner.bridges.clear();
        info!("Update bridges stopped");
    }
}
