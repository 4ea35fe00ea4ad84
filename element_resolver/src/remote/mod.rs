//! Remote (distributed) cache tier.
//!
//! The tier is an optimization for sharing resolutions across processes.
//! Every failure here is logged and turned into `None` or a no-op; the
//! primary tier keeps working without it.

mod memory;

pub use memory::MemoryBackend;

use crate::cache::CacheEntry;
use crate::config::RemoteStoreConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::pressure::{PressureLevel, PressureNotifier};
use async_trait::async_trait;
use element_resolver_types::{CacheKey, ElementCategory, ElementRef};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Minimal Redis-style key/value surface.
///
/// Keys are plain strings and patterns use Redis glob syntax.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Establish (or verify) the connection.
    async fn connect(&self) -> RemoteResult<()>;

    /// Store `value` under `key`, expiring after `ttl_secs` (0 = no expiry).
    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> RemoteResult<()>;

    /// Fetch a value.
    async fn get(&self, key: &str) -> RemoteResult<Option<String>>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> RemoteResult<bool>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> RemoteResult<bool>;

    /// Keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> RemoteResult<Vec<String>>;

    /// Delete every key matching a glob pattern. Returns the count removed.
    async fn del_matching(&self, pattern: &str) -> RemoteResult<usize> {
        let mut removed = 0;
        for key in self.keys(pattern).await? {
            if self.del(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Reset the expiry of an existing key. Returns whether it existed.
    async fn expire(&self, key: &str, ttl_secs: u64) -> RemoteResult<bool>;

    /// Ask the server to release memory.
    async fn memory_purge(&self) -> RemoteResult<()> {
        Err(RemoteError::Unsupported("MEMORY PURGE"))
    }
}

/// Serialized form of a cache entry in the remote tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Cached element handle.
    pub element: ElementRef,
    /// Primary key of the entry.
    pub key: CacheKey,
    /// Parent key, if the entry had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CacheKey>,
    /// Stable identifier, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Element category, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ElementCategory>,
    /// Caller metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Wall-clock write time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl RemoteRecord {
    /// Snapshot a primary-tier entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            element: entry.element.clone(),
            key: entry.key.clone(),
            parent: entry.parent.clone(),
            identifier: entry.identifier.clone(),
            category: entry.category,
            metadata: entry.metadata.clone(),
            created_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    connected: bool,
    failures: u32,
    retry_at: Option<Instant>,
    disabled: bool,
}

/// Bounded, failure-absorbing access to a [`RemoteBackend`].
///
/// Connects lazily on first use. Failed connects back off exponentially
/// (`2^failures` seconds, capped) and after `max_connect_attempts`
/// consecutive failures the tier stays disabled.
pub struct RemoteStoreAdapter {
    backend: Arc<dyn RemoteBackend>,
    config: RemoteStoreConfig,
    state: Mutex<ConnectionState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RemoteStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStoreAdapter")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl RemoteStoreAdapter {
    /// Wrap a backend. Nothing is contacted until the first operation.
    pub fn new(backend: Arc<dyn RemoteBackend>, config: RemoteStoreConfig) -> Arc<Self> {
        Arc::new(Self {
            backend,
            config,
            state: Mutex::new(ConnectionState::default()),
            listener: Mutex::new(None),
        })
    }

    /// Wrap a backend and react to pressure signals.
    ///
    /// Critical pressure triggers [`optimize`](Self::optimize). The listener
    /// only starts when called inside a tokio runtime.
    pub fn with_pressure(
        backend: Arc<dyn RemoteBackend>,
        config: RemoteStoreConfig,
        pressure: &PressureNotifier,
    ) -> Arc<Self> {
        let adapter = Self::new(backend, config);
        if tokio::runtime::Handle::try_current().is_ok() {
            let handle = Self::spawn_pressure_listener(Arc::downgrade(&adapter), pressure);
            *adapter.listener.lock() = Some(handle);
        } else {
            log::debug!("no runtime; remote tier will not listen for pressure signals");
        }
        adapter
    }

    fn spawn_pressure_listener(adapter: Weak<Self>, pressure: &PressureNotifier) -> JoinHandle<()> {
        let mut signals = pressure.subscribe();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(PressureLevel::Critical) => {
                        let Some(adapter) = adapter.upgrade() else { break };
                        adapter.optimize().await;
                    }
                    Ok(PressureLevel::Moderate) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Key namespace in use.
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Configured record expiry.
    pub fn ttl_secs(&self) -> u64 {
        self.config.ttl_secs
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Whether the tier gave up after repeated connect failures.
    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }

    fn remote_key(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn remote_pattern(&self, pattern: &str) -> String {
        format!("{}:{}", self.config.namespace, pattern)
    }

    fn backoff(&self, failures: u32) -> Duration {
        let secs = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.config.max_backoff)
    }

    async fn ensure_connected(&self) -> bool {
        {
            let state = self.state.lock();
            if state.connected {
                return true;
            }
            if state.disabled {
                return false;
            }
            if state.retry_at.is_some_and(|at| Instant::now() < at) {
                return false;
            }
        }

        let outcome = match tokio::time::timeout(self.config.op_timeout, self.backend.connect()).await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        let mut state = self.state.lock();
        match outcome {
            Ok(()) => {
                if !state.connected {
                    log::info!("remote tier connected ({})", self.config.namespace);
                }
                state.connected = true;
                state.failures = 0;
                state.retry_at = None;
                true
            }
            Err(e) => {
                state.failures += 1;
                if state.failures >= self.config.max_connect_attempts {
                    state.disabled = true;
                    log::error!(
                        "remote tier disabled after {} failed connects: {e}",
                        state.failures
                    );
                } else {
                    let delay = self.backoff(state.failures);
                    state.retry_at = Some(Instant::now() + delay);
                    log::warn!("remote tier connect failed, retrying in {delay:?}: {e}");
                }
                false
            }
        }
    }

    fn mark_disconnected(&self) {
        let mut state = self.state.lock();
        if state.connected {
            log::info!("remote tier disconnected ({})", self.config.namespace);
        }
        state.connected = false;
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        if !self.ensure_connected().await {
            return None;
        }
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(RemoteError::Unsupported(command))) => {
                log::debug!("remote {op}: {command} unsupported");
                None
            }
            Ok(Err(e)) => {
                log::warn!("remote {op} failed: {e}");
                if matches!(e, RemoteError::Unavailable(_)) {
                    self.mark_disconnected();
                }
                None
            }
            Err(_) => {
                log::warn!("remote {op} exceeded {:?}", self.config.op_timeout);
                None
            }
        }
    }

    /// Mirror a record. `ttl_secs` defaults to the configured expiry.
    pub async fn set(&self, record: &RemoteRecord, ttl_secs: Option<u64>) -> bool {
        let payload = match serde_json::to_string(record) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("remote set {}: {e}", record.key);
                return false;
            }
        };
        let key = self.remote_key(&record.key);
        let ttl = ttl_secs.unwrap_or(self.config.ttl_secs);
        self.run("set", self.backend.set_ex(&key, payload, ttl))
            .await
            .is_some()
    }

    /// Fetch a record.
    pub async fn get(&self, key: &CacheKey) -> Option<RemoteRecord> {
        let remote_key = self.remote_key(key);
        let raw = self.run("get", self.backend.get(&remote_key)).await??;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("remote record {remote_key} undecodable: {e}");
                None
            }
        }
    }

    /// Delete a record. Returns whether it existed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let remote_key = self.remote_key(key);
        self.run("remove", self.backend.del(&remote_key))
            .await
            .unwrap_or(false)
    }

    /// Whether a record exists.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        let remote_key = self.remote_key(key);
        self.run("exists", self.backend.exists(&remote_key))
            .await
            .unwrap_or(false)
    }

    /// Cache keys in this namespace matching a glob over `strategy:selector`.
    pub async fn keys(&self, pattern: &str) -> Vec<CacheKey> {
        let remote_pattern = self.remote_pattern(pattern);
        let prefix_len = self.config.namespace.len() + 1;
        self.run("keys", self.backend.keys(&remote_pattern))
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|raw| raw.get(prefix_len..).and_then(CacheKey::parse))
            .collect()
    }

    /// Delete every record matching a glob over `strategy:selector`.
    pub async fn flush(&self, pattern: &str) -> usize {
        let remote_pattern = self.remote_pattern(pattern);
        self.run("flush", self.backend.del_matching(&remote_pattern))
            .await
            .unwrap_or(0)
    }

    /// Reset a record's expiry. Returns whether it existed.
    pub async fn set_expiry(&self, key: &CacheKey, ttl_secs: u64) -> bool {
        let remote_key = self.remote_key(key);
        self.run("set_expiry", self.backend.expire(&remote_key, ttl_secs))
            .await
            .unwrap_or(false)
    }

    /// Ask the store to reclaim memory. Unsupported commands are ignored.
    pub async fn optimize(&self) {
        if self
            .run("optimize", self.backend.memory_purge())
            .await
            .is_some()
        {
            log::debug!("remote tier optimized ({})", self.config.namespace);
        }
    }

    /// Stop listening for pressure and optionally flush the namespace.
    pub async fn dispose(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        if self.config.flush_on_dispose {
            let removed = self.flush("*").await;
            log::info!(
                "remote tier flushed {removed} records from {} on dispose",
                self.config.namespace
            );
        }
    }
}

impl Drop for RemoteStoreAdapter {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}
