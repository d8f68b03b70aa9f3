//! TTL + LRU cache of recall results.
//!
//! Purely an optimization: a disabled cache or a poisoned lock behaves as a
//! permanent miss. Keys always include the requesting user, so cached results
//! never cross users.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::config::RetrievalConfig;
use crate::memory::types::AtomSummary;

/// Cache key: requester, normalized query and the result budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: String,
    pub query: String,
    pub result_limit: usize,
    pub char_budget: usize,
}

impl CacheKey {
    pub fn new(user_id: &str, query: &str, result_limit: usize, char_budget: usize) -> Self {
        Self {
            user_id: user_id.to_string(),
            query: normalize_query(query),
            result_limit,
            char_budget,
        }
    }
}

/// Lower-case, drop punctuation, collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

struct CachedResult {
    stored_at: Instant,
    results: Vec<AtomSummary>,
}

pub struct RecallCache {
    inner: Option<Mutex<LruCache<CacheKey, CachedResult>>>,
    ttl: Duration,
}

impl RecallCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Some(Mutex::new(LruCache::new(cap))),
            ttl,
        }
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        if config.cache_enabled {
            Self::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            )
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<AtomSummary>> {
        let inner = self.inner.as_ref()?;
        let mut lru = match inner.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!(stage = "cache", "recall cache lock poisoned, treating as miss");
                return None;
            }
        };
        let fresh = lru.get(key).map(|entry| entry.stored_at.elapsed() <= self.ttl)?;
        if !fresh {
            lru.pop(key);
            return None;
        }
        lru.get(key).map(|entry| entry.results.clone())
    }

    pub fn set(&self, key: CacheKey, results: Vec<AtomSummary>) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        match inner.lock() {
            Ok(mut lru) => {
                lru.put(
                    key,
                    CachedResult {
                        stored_at: Instant::now(),
                        results,
                    },
                );
            }
            Err(_) => {
                tracing::warn!(stage = "cache", "recall cache lock poisoned, result not cached");
            }
        }
    }

    /// Drop every entry belonging to `user_id`.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        let Some(inner) = self.inner.as_ref() else {
            return 0;
        };
        let Ok(mut lru) = inner.lock() else {
            tracing::warn!(stage = "cache", "recall cache lock poisoned, invalidation skipped");
            return 0;
        };
        let stale: Vec<CacheKey> = lru
            .iter()
            .filter(|(k, _)| k.user_id == user_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            lru.pop(key);
        }
        stale.len()
    }

    pub fn clear(&self) {
        if let Some(Ok(mut lru)) = self.inner.as_ref().map(|m| m.lock()) {
            lru.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .as_ref()
            .and_then(|m| m.lock().ok().map(|lru| lru.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
