//! # Call Context Cache
//!
//! Keyed store mapping a call identifier to the candidate metadata captured
//! at call-registration time. The telephony platform does not reliably
//! forward custom fields into the live session, so the orchestrator re-reads
//! them from here when `call_details` arrives.
//!
//! ## Lifecycle:
//! - **store**: overwrites any existing entry and stamps its creation time
//! - **get**: returns a live entry or nothing; every read logs hit/miss
//! - **sweep**: a periodic background task removes entries past the TTL;
//!   `get` also refuses expired entries between sweeps
//!
//! Entries outlive any one session object, so metadata survives platform
//! reconnects. The cache is constructed once in `main` and injected through
//! `AppState`; concurrent key-based access is safe (read of one key never
//! affects another).

use crate::protocol::DynamicVariables;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One registered call's metadata plus bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct CallContextEntry {
    pub variables: DynamicVariables,
    pub registered_at: DateTime<Utc>,
    created_at: Instant,
}

impl CallContextEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// TTL keyed store for call-registration metadata.
pub struct CallContextCache {
    entries: RwLock<HashMap<String, CallContextEntry>>,
    ttl: Duration,
}

impl CallContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Store metadata for a call, overwriting any existing entry.
    pub fn store(&self, call_id: &str, variables: DynamicVariables) {
        let entry = CallContextEntry {
            variables,
            registered_at: Utc::now(),
            created_at: Instant::now(),
        };

        let mut entries = self.entries.write().unwrap();
        let replaced = entries.insert(call_id.to_string(), entry).is_some();
        info!(call_id = %call_id, replaced, "Call context stored");
    }

    /// Look up metadata for a call. Expired entries are treated as misses
    /// and dropped immediately rather than waiting for the sweep.
    pub fn get(&self, call_id: &str) -> Option<CallContextEntry> {
        let expired = {
            let entries = self.entries.read().unwrap();
            match entries.get(call_id) {
                Some(entry) if !entry.is_expired(self.ttl) => {
                    info!(call_id = %call_id, hit = true, "Call context lookup");
                    return Some(entry.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.entries.write().unwrap().remove(call_id);
        }
        info!(call_id = %call_id, hit = false, expired, "Call context lookup");
        None
    }

    /// Remove all expired entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.ttl));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Call context sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Test hook: store an entry whose creation time is `age` in the past.
    #[cfg(test)]
    pub fn store_aged(&self, call_id: &str, variables: DynamicVariables, age: Duration) {
        let entry = CallContextEntry {
            variables,
            registered_at: Utc::now(),
            created_at: Instant::now() - age,
        };
        self.entries
            .write()
            .unwrap()
            .insert(call_id.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> DynamicVariables {
        DynamicVariables {
            first_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_store_and_get() {
        let cache = CallContextCache::new(Duration::from_secs(3600));
        cache.store("call_1", vars("Dana"));

        let entry = cache.get("call_1").unwrap();
        assert_eq!(entry.variables.first_name.as_deref(), Some("Dana"));
        assert!(cache.get("call_2").is_none());
    }

    #[test]
    fn test_store_overwrites_existing_entry() {
        let cache = CallContextCache::new(Duration::from_secs(3600));
        cache.store("call_1", vars("Dana"));
        cache.store("call_1", vars("Riley"));

        let entry = cache.get("call_1").unwrap();
        assert_eq!(entry.variables.first_name.as_deref(), Some("Riley"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_is_dropped() {
        let cache = CallContextCache::new(Duration::from_secs(60));
        cache.store_aged("call_1", vars("Dana"), Duration::from_secs(120));

        assert!(cache.get("call_1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let cache = CallContextCache::new(Duration::from_secs(60));
        cache.store_aged("old", vars("Dana"), Duration::from_secs(120));
        cache.store("fresh", vars("Riley"));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").is_some());
    }
}
