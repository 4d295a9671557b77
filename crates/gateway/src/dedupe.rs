//! TTL-based idempotency cache for node invokes.
//!
//! A duplicate `idempotencyKey` within the window short-circuits to the
//! previously recorded result.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use clawgate_protocol::{DEDUPE_MAX_ENTRIES, DEDUPE_TTL_MS};

struct DedupeEntry {
    inserted_at: Instant,
    result: serde_json::Value,
}

pub struct DedupeCache {
    entries: HashMap<String, DedupeEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupeCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::from_millis(DEDUPE_TTL_MS),
            max_entries: DEDUPE_MAX_ENTRIES,
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::new()
        }
    }

    /// Previously recorded result for `key`, if still within the TTL.
    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        self.evict_expired();
        self.entries.get(key).map(|e| e.result.clone())
    }

    /// Record the result for `key`, evicting the oldest entry at capacity.
    pub fn record(&mut self, key: &str, result: serde_json::Value) {
        self.evict_expired();
        if self.entries.len() >= self.max_entries
            && let Some(oldest_key) = self
                .entries
                .iter()
                .min_by_key(|(_, v)| v.inserted_at)
                .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest_key);
        }
        self.entries.insert(key.to_string(), DedupeEntry {
            inserted_at: Instant::now(),
            result,
        });
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, v| v.inserted_at.elapsed() < ttl);
    }
}
