//! Live traffic metrics
//!
//! TTL-expiring maps of per-host and per-target counters. Values are shared
//! `Arc`s holding atomic counters, so relay tasks update them without
//! holding any lock; the map lock is only taken for lookup and iteration.

use lru_time_cache::LruCache;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Idle lifetime of a per-host metrics entry.
pub const HOST_METRICS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Idle lifetime of a per-target metrics entry.
pub const TARGET_METRICS_TTL: Duration = Duration::from_secs(30 * 60);

/// Traffic counters shared by hosts and targets.
///
/// `rx` counts bytes flowing back toward the client, `tx` bytes flowing
/// toward the target.
#[derive(Debug, Default)]
pub struct NetMetrics {
    /// Concurrently active sessions
    pub active: AtomicI64,
    /// Bytes relayed toward the client
    pub rx: AtomicI64,
    /// Bytes relayed toward the target
    pub tx: AtomicI64,
}

/// Per-client-IP counters, created lazily on first observation.
#[derive(Debug, Default)]
pub struct HostMetrics {
    /// TCP traffic counters
    pub net: NetMetrics,
    /// Concurrently active UDP associations
    pub active_udp: AtomicI64,
    /// Requests seen, indexed by command code
    pub commands: [AtomicI64; 4],
    last_seen: AtomicU64,
}

impl HostMetrics {
    /// Count one request for `command` and refresh the last-seen stamp.
    ///
    /// Command codes outside the tracked range are ignored rather than
    /// counted, so a bogus command byte cannot corrupt the table.
    pub fn record_command(&self, command: u8) {
        if let Some(counter) = self.commands.get(command as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    /// Refresh the last-seen stamp to now.
    pub fn touch(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_seen.store(now, Ordering::Relaxed);
    }

    /// When this host was last observed, if ever.
    pub fn last_seen(&self) -> Option<SystemTime> {
        match self.last_seen.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }
}

/// A TTL-expiring map of shared metric values.
///
/// Get-or-create is atomic per key under a single short-held lock. Reads
/// refresh the entry's TTL; entries expire only by idleness, never by
/// session close, so post-mortem inspection remains possible.
pub struct MetricsMap<V> {
    inner: Arc<Mutex<LruCache<String, Arc<V>>>>,
}

impl<V> Clone for MetricsMap<V> {
    fn clone(&self) -> Self {
        MetricsMap {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Default> MetricsMap<V> {
    /// Create a map whose entries expire after `ttl` of idleness.
    pub fn new(ttl: Duration) -> Self {
        MetricsMap {
            inner: Arc::new(Mutex::new(LruCache::with_expiry_duration(ttl))),
        }
    }

    /// Fetch the entry for `key`, creating it when absent.
    pub fn get_or_create(&self, key: &str) -> Arc<V> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = cache.get(key) {
            return value.clone();
        }
        let value = Arc::new(V::default());
        cache.insert(key.to_string(), value.clone());
        value
    }

    /// Invoke `f` for every live entry of a read snapshot.
    ///
    /// Iteration order is unspecified; expired entries are dropped before
    /// the snapshot is taken.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<V>),
    {
        let snapshot: Vec<(String, Arc<V>)> = {
            let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            cache
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        for (key, value) in &snapshot {
            f(key, value);
        }
    }
}

/// RAII increment of an active-session counter.
///
/// Decrements on drop, covering every exit path of the owning handler.
pub(crate) struct CounterGuard<T> {
    owner: Arc<T>,
    counter: fn(&T) -> &AtomicI64,
}

impl<T> CounterGuard<T> {
    /// Increment the counter selected by `counter` and return the guard.
    pub(crate) fn enter(owner: Arc<T>, counter: fn(&T) -> &AtomicI64) -> Self {
        counter(&owner).fetch_add(1, Ordering::Relaxed);
        CounterGuard { owner, counter }
    }
}

impl<T> Drop for CounterGuard<T> {
    fn drop(&mut self) {
        (self.counter)(&self.owner).fetch_sub(1, Ordering::Relaxed);
    }
}
