//! Concurrent key/value map whose entries expire.
//!
//! Backs the ephemeral presence-adjacent state: latest location samples and
//! arrival cool-downs. Expired entries are invisible to readers immediately
//! and physically removed by `purge_expired` from the scheduled sweep.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlMap<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Last write wins.
    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Insert only if the key is absent or expired. Returns true when inserted.
    pub fn insert_if_vacant(&self, key: K, value: V, now: Instant) -> bool {
        let mut entry = self.entries.entry(key).or_insert_with(|| Entry {
            value: value.clone(),
            expires_at: now,
        });
        if entry.expires_at > now {
            return false;
        }
        entry.value = value;
        entry.expires_at = now + self.ttl;
        true
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Live entries at `now`.
    pub fn fresh_values(&self, now: Instant) -> Vec<(K, V)> {
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| (entry.key().clone(), entry.value.clone()))
            .collect()
    }

    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}
