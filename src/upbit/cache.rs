// =============================================================================
// TTL Cache — keyed JSON response store with lazy expiry
// =============================================================================
//
// Shared between the Upbit client (market-data responses) and the report
// route (derived-report lookups). Keys are canonical strings built from the
// endpoint path plus the sorted parameter set, so two semantically identical
// requests hit the same entry. Expired entries are purged on read; there is
// no background sweep.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

struct CacheEntry {
    expires_at: Instant,
    value: Value,
}

/// Thread-safe key → JSON value store with per-entry expiry.
pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live entry. An entry whose TTL has elapsed counts as absent and
    /// is removed on the spot.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!(key, "cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!(key, "cache entry expired — purging");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key` for `ttl`. A zero TTL marks the response
    /// class as non-cacheable and the call is a no-op.
    pub fn put(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let key = key.into();
        debug!(key = %key, ttl_secs = ttl.as_secs(), "cache store");
        self.entries.lock().insert(
            key,
            CacheEntry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }

    /// Number of entries currently held (expired but not-yet-purged included).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the canonical cache key for a logical request: endpoint path plus
/// the parameter set sorted by name. Parameter order at the call site must
/// not produce distinct keys.
pub fn canonical_key(path: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{path}?{}", query.join("&"))
}
