//! TTL- and size-bounded result cache keyed by request fingerprint.
//!
//! Entries expire lazily on read and can also be swept with
//! [`CacheManager::purge_expired`]. When `max_entries` is exceeded on insert
//! the oldest-inserted entries are evicted first (FIFO); overwriting a key
//! counts as a fresh insertion.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use url::Url;

use crate::models::compute_hash;

/// Deterministic cache key for one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build the key from target identity, method name and options.
    ///
    /// `defaults` is the serialized default option set: any option equal to
    /// its default (or `null`) is treated as omitted, and key order never
    /// matters.
    pub fn new(target: &str, method: &str, options: &Value, defaults: &Value) -> Self {
        let canonical = canonicalize(options, defaults);
        let material = format!(
            "{}\n{}\n{}",
            normalize_target(target),
            method.trim().to_lowercase(),
            canonical
        );
        Self(compute_hash(&material))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_target(target: &str) -> String {
    let trimmed = target.trim();
    match Url::parse(trimmed) {
        Ok(url) => url.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Sorted-key, default-stripped form of `value`.
pub fn canonicalize(value: &Value, defaults: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .filter_map(|(k, v)| {
                    let default = defaults.get(k).unwrap_or(&Value::Null);
                    if v == default {
                        return None;
                    }
                    let canonical = canonicalize(v, default);
                    // An object that only held defaults is itself a default.
                    if canonical.as_object().is_some_and(Map::is_empty) && default.is_object() {
                        return None;
                    }
                    Some((k, canonical))
                })
                .collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| canonicalize(item, &Value::Null))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Counters exposed through the service-management surface.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_entries: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<Fingerprint, CacheEntry<V>>,
    /// Insertion sequence → key; first entry is the oldest insertion.
    order: BTreeMap<u64, Fingerprint>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> CacheInner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
}

/// In-memory result cache, shared by clone.
#[derive(Debug)]
pub struct CacheManager<V> {
    default_ttl: Duration,
    max_entries: Option<usize>,
    inner: Arc<Mutex<CacheInner<V>>>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            default_ttl: self.default_ttl,
            max_entries: self.max_entries,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> CacheManager<V> {
    /// `max_entries = None` leaves the cache unbounded in size.
    pub fn new(default_ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            default_ttl,
            max_entries,
            inner: Arc::new(Mutex::new(CacheInner::new())),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock_inner(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cache mutex");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let mut inner = self.lock_inner();
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            tracing::debug!(fingerprint = %key.short(), "Cache entry expired");
            return None;
        }

        inner.hits += 1;
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert with the default TTL.
    pub fn insert(&self, key: Fingerprint, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn set(&self, key: Fingerprint, value: V, ttl: Duration) {
        let mut inner = self.lock_inner();

        inner.remove(&key);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
                seq,
            },
        );

        if let Some(max) = self.max_entries {
            while inner.entries.len() > max {
                let Some((_, oldest)) = inner.order.pop_first() else {
                    break;
                };
                inner.entries.remove(&oldest);
                inner.evictions += 1;
                tracing::debug!(fingerprint = %oldest.short(), "Evicted oldest cache entry");
            }
        }
    }

    /// Remove every entry; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock_inner();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        removed
    }

    /// Drop every expired entry now rather than on next read.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock_inner();
        let now = Instant::now();
        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock_inner();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_entries: self.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}
