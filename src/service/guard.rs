use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashSet;

/// Keys with an operation outstanding.
///
/// Claiming a key is a synchronous check-and-set, so it must happen before the first await of
/// the operation it guards. A second claim on a held key fails instead of waiting.
#[derive(Debug)]
pub struct InFlight<K: Hash + Eq> {
    keys: Arc<DashSet<K>>,
}

impl<K: Hash + Eq + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(DashSet::new()),
        }
    }

    /// Claims `key`, or returns `None` when it is already claimed. The claim is released when
    /// the returned guard drops.
    pub fn try_claim(&self, key: K) -> Option<FlightGuard<K>> {
        if !self.keys.insert(key.clone()) {
            return None;
        }

        Some(FlightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    pub fn is_claimed(&self, key: &K) -> bool {
        self.keys.contains(key)
    }
}

impl<K: Hash + Eq + Clone> Default for InFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq> Clone for InFlight<K> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
        }
    }
}

#[derive(Debug)]
pub struct FlightGuard<K: Hash + Eq> {
    keys: Arc<DashSet<K>>,
    key: K,
}

impl<K: Hash + Eq> Drop for FlightGuard<K> {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}
