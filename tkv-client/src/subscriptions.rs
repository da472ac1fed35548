//! Per-session registry of channel subscribers.
//!
//! Each link owns its own table; the pool registers a subscriber on every
//! link it fans a SUBSCRIBE out to. Entries survive reconnects so a revived
//! link keeps delivering to the same callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tkv_common::Subscriber;

#[derive(Clone, Default)]
pub struct SubscriptionTable {
    inner: Arc<RwLock<HashMap<String, Subscriber>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for `channel`, returning the one it replaced.
    pub fn register(&self, channel: impl Into<String>, subscriber: Subscriber) -> Option<Subscriber> {
        self.inner.write().insert(channel.into(), subscriber)
    }

    pub fn unregister(&self, channel: &str) -> Option<Subscriber> {
        self.inner.write().remove(channel)
    }

    /// Cloned out so the callback runs without the lock held.
    pub fn get(&self, channel: &str) -> Option<Subscriber> {
        self.inner.read().get(channel).cloned()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.inner.read().contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.inner.read().keys().cloned().collect();
        channels.sort();
        channels
    }
}
