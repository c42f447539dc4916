//! Keyed response cache for upstream API payloads.
//!
//! Each source client checks the cache before issuing a network call and
//! writes back only after a successful fetch, so transient outages are
//! retried on the next request instead of being cached as empty.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::record::SourceName;

const DEFAULT_TTL_DAYS: i64 = 30;
const TTL_ENV: &str = "DRUGFACTS_CACHE_TTL_DAYS";

/// Cache TTL from `DRUGFACTS_CACHE_TTL_DAYS`, defaulting to 30 days.
pub fn cache_ttl() -> Duration {
    let days = std::env::var(TTL_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_TTL_DAYS);
    Duration::days(days)
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Shared response cache keyed by `(source, normalized drug name)`.
///
/// Implementations must be safe for concurrent access from many in-flight
/// aggregations. Expiry is evaluated at read time; an expired entry behaves
/// exactly like a miss. `put` overwrites any existing entry for the key.
pub trait ResponseCache: Send + Sync {
    fn get(&self, source: SourceName, name: &str) -> Option<Value>;
    fn put(&self, source: SourceName, name: &str, payload: Value, ttl: Duration);
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// In-process cache backed by a mutex-guarded map. Last write wins; staleness
/// is bounded by the TTL, so no further coordination is needed.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<(SourceName, String), CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn insert_entry(
        &self,
        source: SourceName,
        name: &str,
        payload: Value,
        created_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            (source, normalize_name(name)),
            CacheEntry {
                payload,
                created_at,
                expires_at,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, source: SourceName, name: &str) -> Option<Value> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(&(source, normalize_name(name)))?;
        if entry.expires_at <= OffsetDateTime::now_utc() {
            tracing::debug!(source = %source, name, "cache entry expired");
            return None;
        }
        tracing::debug!(source = %source, name, "cache hit");
        Some(entry.payload.clone())
    }

    fn put(&self, source: SourceName, name: &str, payload: Value, ttl: Duration) {
        let created_at = OffsetDateTime::now_utc();
        let entry = CacheEntry {
            payload,
            created_at,
            expires_at: created_at + ttl,
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((source, normalize_name(name)), entry);
        }
    }
}
