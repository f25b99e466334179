//! Subscription table - the one owner of every live feed handle

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PinError, Result};
use crate::network::FeedHandle;
use crate::types::PublicKey;

/// A live handle plus whether its update bridge is attached
pub struct Subscription {
    pub handle: Arc<dyn FeedHandle>,
    pub listening: bool,
}

/// Registry of subscribed keys.
///
/// At most one handle per key; `mark_listening` flips once per key so the
/// update bridge is attached at most once.
#[derive(Default)]
pub struct SubscriptionTable {
    subscriptions: BTreeMap<PublicKey, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: &PublicKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    /// Insert a handle for a key that has none yet
    pub fn register(&mut self, key: PublicKey, handle: Arc<dyn FeedHandle>) -> Result<()> {
        if self.has(&key) {
            return Err(PinError::DuplicateSubscription(key.to_string()));
        }
        self.subscriptions.insert(
            key,
            Subscription {
                handle,
                listening: false,
            },
        );
        Ok(())
    }

    /// Set `listening`; returns true only on the call that changed it
    pub fn mark_listening(&mut self, key: &PublicKey) -> Result<bool> {
        let subscription = self
            .subscriptions
            .get_mut(key)
            .ok_or_else(|| PinError::NotFound(key.to_string()))?;
        let changed = !subscription.listening;
        subscription.listening = true;
        Ok(changed)
    }

    pub fn get(&self, key: &PublicKey) -> Result<Arc<dyn FeedHandle>> {
        self.subscriptions
            .get(key)
            .map(|s| Arc::clone(&s.handle))
            .ok_or_else(|| PinError::NotFound(key.to_string()))
    }

    /// Every subscription in key order
    pub fn all(&self) -> impl Iterator<Item = (&PublicKey, &Arc<dyn FeedHandle>)> {
        self.subscriptions.iter().map(|(key, s)| (key, &s.handle))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn listening_count(&self) -> usize {
        self.subscriptions.values().filter(|s| s.listening).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{FeedNetwork, MemoryNetwork};

    async fn handle(network: &MemoryNetwork, byte: u8) -> (PublicKey, Arc<dyn FeedHandle>) {
        let key = PublicKey::from_bytes([byte; 32]);
        let handle = network.open(&key).await.unwrap();
        (key, handle)
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let network = MemoryNetwork::new();
        let (key, h) = handle(&network, 1).await;
        let mut table = SubscriptionTable::new();

        assert!(!table.has(&key));
        table.register(key, h).unwrap();

        assert!(table.has(&key));
        assert_eq!(table.get(&key).unwrap().key(), &key);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_register_twice_is_duplicate() {
        let network = MemoryNetwork::new();
        let (key, h) = handle(&network, 2).await;
        let mut table = SubscriptionTable::new();

        table.register(key, Arc::clone(&h)).unwrap();
        let err = table.register(key, h).unwrap_err();

        assert!(matches!(err, PinError::DuplicateSubscription(_)));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_listening_changes_once() {
        let network = MemoryNetwork::new();
        let (key, h) = handle(&network, 3).await;
        let mut table = SubscriptionTable::new();
        table.register(key, h).unwrap();

        assert_eq!(table.listening_count(), 0);
        assert!(table.mark_listening(&key).unwrap());
        assert!(!table.mark_listening(&key).unwrap());
        assert_eq!(table.listening_count(), 1);
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let mut table = SubscriptionTable::new();
        let key = PublicKey::from_bytes([4u8; 32]);

        assert!(matches!(table.get(&key), Err(PinError::NotFound(_))));
        assert!(matches!(table.mark_listening(&key), Err(PinError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_all_is_key_ordered() {
        let network = MemoryNetwork::new();
        let mut table = SubscriptionTable::new();
        for byte in [9u8, 1, 5] {
            let (key, h) = handle(&network, byte).await;
            table.register(key, h).unwrap();
        }

        let keys: Vec<u8> = table.all().map(|(k, _)| k.as_bytes()[0]).collect();
        assert_eq!(keys, vec![1, 5, 9]);
    }
}
