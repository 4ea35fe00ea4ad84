//! In-process remote backend.
//!
//! Shares records between caches in the same process and stands in for a
//! networked store in tests. Keys expire lazily, like a Redis keyspace.

use super::RemoteBackend;
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use dashmap::DashMap;
use element_resolver_types::glob_match;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// A [`RemoteBackend`] over a concurrent in-memory map.
#[derive(Debug)]
pub struct MemoryBackend {
    data: DashMap<String, StoredValue>,
    reachable: AtomicBool,
    supports_purge: bool,
    connects: AtomicUsize,
    purges: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// An empty, reachable backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            reachable: AtomicBool::new(true),
            supports_purge: true,
            connects: AtomicUsize::new(0),
            purges: AtomicUsize::new(0),
        }
    }

    /// Reject `memory_purge` as an unsupported command.
    pub fn without_purge(mut self) -> Self {
        self.supports_purge = false;
        self
    }

    /// Simulate the store going away or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    /// Successful and failed connect attempts so far.
    pub fn connect_attempts(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Purge requests served.
    pub fn purge_count(&self) -> usize {
        self.purges.load(Ordering::Relaxed)
    }

    /// Live key count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| e.value().is_live(now)).count()
    }

    /// Whether no live keys remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of a key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.data.get(key)?;
        entry
            .expires_at
            .filter(|_| entry.is_live(now))
            .map(|at| at - now)
    }

    fn check_reachable(&self) -> RemoteResult<()> {
        if self.reachable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("connection refused".into()))
        }
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        let value = self.data.get(key).map(|e| e.value().clone())?;
        if value.is_live(now) {
            Some(value)
        } else {
            self.data.remove_if(key, |_, v| !v.is_live(now));
            None
        }
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn connect(&self) -> RemoteResult<()> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        self.check_reachable()
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> RemoteResult<()> {
        self.check_reachable()?;
        let expires_at = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        self.data
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> RemoteResult<Option<String>> {
        self.check_reachable()?;
        Ok(self.live(key).map(|v| v.value))
    }

    async fn del(&self, key: &str) -> RemoteResult<bool> {
        self.check_reachable()?;
        let now = Instant::now();
        Ok(self
            .data
            .remove(key)
            .is_some_and(|(_, v)| v.is_live(now)))
    }

    async fn exists(&self, key: &str) -> RemoteResult<bool> {
        self.check_reachable()?;
        Ok(self.live(key).is_some())
    }

    async fn keys(&self, pattern: &str) -> RemoteResult<Vec<String>> {
        self.check_reachable()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.value().is_live(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn del_matching(&self, pattern: &str) -> RemoteResult<usize> {
        self.check_reachable()?;
        let now = Instant::now();
        let before = self.data.len();
        let mut removed_live = 0;
        self.data.retain(|key, value| {
            if glob_match(pattern, key) {
                if value.is_live(now) {
                    removed_live += 1;
                }
                false
            } else {
                true
            }
        });
        log::trace!(
            "memory backend removed {} keys matching {pattern}",
            before - self.data.len()
        );
        Ok(removed_live)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> RemoteResult<bool> {
        self.check_reachable()?;
        let now = Instant::now();
        match self.data.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn memory_purge(&self) -> RemoteResult<()> {
        self.check_reachable()?;
        if !self.supports_purge {
            return Err(RemoteError::Unsupported("MEMORY PURGE"));
        }
        let now = Instant::now();
        self.data.retain(|_, v| v.is_live(now));
        self.purges.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
