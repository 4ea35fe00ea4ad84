//! Two-tier element cache.
//!
//! Features:
//! - TTL expiry on access, discovered lazily on lookup
//! - LRU pruning by percentage, on a timer and on memory pressure
//! - Identifier, category and parent/child indices kept consistent with the
//!   primary map under one lock
//! - Cascading, glob-pattern invalidation
//! - Optional remote tier for cross-process sharing

mod index;

pub use index::CacheEntry;

use crate::config::CacheConfig;
use crate::driver::{read_identifier, AttributeReader};
use crate::pressure::{PressureLevel, PressureNotifier};
use crate::remote::{RemoteRecord, RemoteStoreAdapter};
use element_resolver_types::{glob_match, CacheKey, ElementCategory, ElementRef, LocatorStrategy};
use index::CacheIndex;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Free-form metadata attached to an entry.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
    evictions: AtomicUsize,
    invalidations: AtomicUsize,
    remote_hits: AtomicUsize,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Lookups answered by either tier.
    pub hits: usize,
    /// Lookups answered by neither tier.
    pub misses: usize,
    /// Entries dropped for exceeding the TTL.
    pub expirations: usize,
    /// Entries dropped by pruning.
    pub evictions: usize,
    /// Entries dropped by invalidation, descendants included.
    pub invalidations: usize,
    /// Hits served from the remote tier.
    pub remote_hits: usize,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get expiration count.
    pub fn expirations(&self) -> usize {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get invalidation count.
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Get remote-tier hit count.
    pub fn remote_hits(&self) -> usize {
        self.remote_hits.load(Ordering::Relaxed)
    }

    /// Get hit rate.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            expirations: self.expirations(),
            evictions: self.evictions(),
            invalidations: self.invalidations(),
            remote_hits: self.remote_hits(),
        }
    }

    /// Reset stats.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.remote_hits.store(0, Ordering::Relaxed);
    }

    fn add(counter: &AtomicUsize, n: usize) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Entries removed for exceeding the TTL.
    pub expired: usize,
    /// Entries pruned to get back under the soft cap.
    pub pruned: usize,
    /// Entries written back to a remote tier that had lost them.
    pub remirrored: usize,
    /// Remote records whose expiry was refreshed.
    pub refreshed: usize,
}

impl MaintenanceReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

enum Lookup {
    Hit(ElementRef),
    Expired,
    Missing,
}

/// Builder for [`ElementCache`].
#[derive(Default)]
pub struct ElementCacheBuilder {
    config: CacheConfig,
    reader: Option<Arc<dyn AttributeReader>>,
    remote: Option<Arc<RemoteStoreAdapter>>,
    pressure: Option<PressureNotifier>,
}

impl ElementCacheBuilder {
    /// Start from a config.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Read identifiers and categories off inserted elements.
    pub fn reader(mut self, reader: Arc<dyn AttributeReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Mirror entries to a remote tier.
    pub fn remote(mut self, remote: Arc<RemoteStoreAdapter>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Prune in response to pressure signals.
    pub fn pressure(mut self, pressure: PressureNotifier) -> Self {
        self.pressure = Some(pressure);
        self
    }

    /// Build the cache.
    ///
    /// Inside a tokio runtime this also starts the maintenance timer and the
    /// pressure listener. Both stop on [`ElementCache::dispose`] or when the
    /// cache is dropped.
    pub fn build(self) -> Arc<ElementCache> {
        let cache = Arc::new(ElementCache {
            index: RwLock::new(CacheIndex::default()),
            config: self.config,
            reader: self.reader,
            remote: self.remote,
            stats: CacheStats::default(),
            tasks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });

        if tokio::runtime::Handle::try_current().is_ok() {
            let mut tasks = Vec::with_capacity(2);
            if !cache.config.prune_interval.is_zero() {
                tasks.push(ElementCache::spawn_maintenance(
                    Arc::downgrade(&cache),
                    cache.config.prune_interval,
                ));
            }
            if let Some(pressure) = &self.pressure {
                tasks.push(ElementCache::spawn_pressure_listener(
                    Arc::downgrade(&cache),
                    pressure,
                ));
            }
            *cache.tasks.lock() = tasks;
        } else {
            log::debug!("element cache built outside a runtime; background tasks not started");
        }

        cache
    }
}

/// Element cache with a primary in-process tier and an optional remote tier.
pub struct ElementCache {
    index: RwLock<CacheIndex>,
    config: CacheConfig,
    reader: Option<Arc<dyn AttributeReader>>,
    remote: Option<Arc<RemoteStoreAdapter>>,
    stats: CacheStats,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for ElementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementCache")
            .field("entries", &self.len())
            .field("config", &self.config)
            .field("remote", &self.remote)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ElementCache {
    /// A primary-tier-only cache.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    /// Start building a cache.
    pub fn builder(config: CacheConfig) -> ElementCacheBuilder {
        ElementCacheBuilder::new(config)
    }

    /// Policy in effect.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of primary-tier entries, expired ones included until noticed.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Whether the primary tier is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a key is present in the primary tier.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.read().contains(key)
    }

    /// Primary-tier keys in no particular order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.index.read().keys().cloned().collect()
    }

    /// Copy of an entry, without refreshing it.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.index.read().get(key).cloned()
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn debug_check(index: &CacheIndex) {
        if cfg!(debug_assertions) {
            if let Err(violation) = index.check_invariants() {
                panic!("element cache index corrupted: {violation}");
            }
        }
    }

    /// Cache an element under `strategy:selector`.
    ///
    /// Idempotent: an existing key only has its access time refreshed and
    /// keeps its original element. Returns the key.
    pub async fn put(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        element: ElementRef,
        parent: Option<&CacheKey>,
        metadata: Option<Metadata>,
    ) -> CacheKey {
        let key = CacheKey::new(strategy, selector);
        self.put_key(key.clone(), element, parent, metadata).await;
        key
    }

    /// Cache an element under an explicit key. Returns whether it was newly inserted.
    pub async fn put_key(
        &self,
        key: CacheKey,
        element: ElementRef,
        parent: Option<&CacheKey>,
        metadata: Option<Metadata>,
    ) -> bool {
        if self.is_disposed() {
            return false;
        }
        if self.index.write().touch(&key, Instant::now()).is_some() {
            log::trace!("cache refresh {key}");
            return false;
        }

        let metadata = metadata.unwrap_or_default();
        let (identifier, category) = self.inspect(&element, &metadata).await;

        let now = Instant::now();
        let mut entry = CacheEntry::new(key.clone(), element, now);
        entry.parent = parent.cloned();
        entry.identifier = identifier;
        entry.category = category;
        entry.metadata = metadata;

        let record = {
            let mut index = self.index.write();
            if index.touch(&key, now).is_some() {
                return false;
            }
            index.insert(entry);
            Self::debug_check(&index);
            match (&self.remote, index.get(&key)) {
                (Some(_), Some(inserted)) => Some(RemoteRecord::from_entry(inserted)),
                _ => None,
            }
        };
        log::debug!("cache insert {key}");

        self.enforce_cap();

        if let (Some(remote), Some(record)) = (&self.remote, record) {
            remote.set(&record, None).await;
        }
        true
    }

    async fn inspect(
        &self,
        element: &ElementRef,
        metadata: &Metadata,
    ) -> (Option<String>, Option<ElementCategory>) {
        let mut identifier = metadata
            .get("identifier")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let mut category = metadata
            .get("category")
            .and_then(serde_json::Value::as_str)
            .and_then(ElementCategory::from_tag);

        if let Some(reader) = &self.reader {
            if identifier.is_none() {
                identifier = read_identifier(reader.as_ref(), element).await;
            }
            if category.is_none() {
                category = match reader.read_category(element).await {
                    Ok(category) => Some(category),
                    Err(e) => {
                        log::trace!("category read failed on {element}: {e}");
                        None
                    }
                };
            }
        }

        (identifier, category)
    }

    fn lookup_primary(&self, key: &CacheKey) -> Lookup {
        let now = Instant::now();
        let mut index = self.index.write();
        let expired = match index.get(key) {
            None => return Lookup::Missing,
            Some(entry) => entry.is_expired(now, self.config.ttl),
        };
        if expired {
            index.remove(key);
            Self::debug_check(&index);
            return Lookup::Expired;
        }
        match index.touch(key, now) {
            Some(element) => Lookup::Hit(element),
            None => Lookup::Missing,
        }
    }

    /// Look up `strategy:selector`.
    pub async fn get(&self, strategy: LocatorStrategy, selector: &str) -> Option<ElementRef> {
        self.get_key(&CacheKey::new(strategy, selector)).await
    }

    /// Look up a key, expiring it if stale and falling back to the remote tier.
    pub async fn get_key(&self, key: &CacheKey) -> Option<ElementRef> {
        if self.is_disposed() {
            return None;
        }

        match self.lookup_primary(key) {
            Lookup::Hit(element) => {
                CacheStats::add(&self.stats.hits, 1);
                log::debug!("cache hit {key}");
                return Some(element);
            }
            Lookup::Expired => {
                CacheStats::add(&self.stats.expirations, 1);
                CacheStats::add(&self.stats.misses, 1);
                log::debug!("cache entry {key} expired");
                if let Some(remote) = &self.remote {
                    remote.remove(key).await;
                }
                return None;
            }
            Lookup::Missing => {}
        }

        if let Some(remote) = &self.remote {
            if let Some(record) = remote.get(key).await.filter(|r| &r.key == key) {
                let element = record.element.clone();
                self.adopt(record);
                CacheStats::add(&self.stats.hits, 1);
                CacheStats::add(&self.stats.remote_hits, 1);
                log::debug!("remote cache hit {key}");
                return Some(element);
            }
        }

        CacheStats::add(&self.stats.misses, 1);
        log::debug!("cache miss {key}");
        None
    }

    /// Copy a remote record into the primary tier without mirroring it back.
    fn adopt(&self, record: RemoteRecord) {
        let now = Instant::now();
        {
            let mut index = self.index.write();
            if index.touch(&record.key, now).is_some() {
                return;
            }
            let mut entry = CacheEntry::new(record.key, record.element, now);
            entry.parent = record.parent;
            entry.identifier = record.identifier;
            entry.category = record.category;
            entry.metadata = record.metadata;
            index.insert(entry);
            Self::debug_check(&index);
        }
        self.enforce_cap();
    }

    /// Look up an element by its stable identifier.
    pub async fn get_by_identifier(&self, identifier: &str) -> Option<ElementRef> {
        let key = self.index.read().key_for_identifier(identifier)?;
        self.get_key(&key).await
    }

    /// Every live element of a category. Stale entries are expired on the way.
    pub fn get_by_category(&self, category: ElementCategory) -> Vec<ElementRef> {
        if self.is_disposed() {
            return Vec::new();
        }
        let now = Instant::now();
        let mut index = self.index.write();
        let mut found = Vec::new();
        let mut expired = 0;

        for key in index.keys_for_category(category) {
            let is_expired = index
                .get(&key)
                .is_some_and(|entry| entry.is_expired(now, self.config.ttl));
            if is_expired {
                index.remove(&key);
                expired += 1;
            } else if let Some(element) = index.touch(&key, now) {
                found.push(element);
            }
        }

        if expired > 0 {
            Self::debug_check(&index);
            CacheStats::add(&self.stats.expirations, expired);
        }
        found
    }

    /// Keys of the entries directly under `parent`.
    pub fn children_of(&self, parent: &CacheKey) -> Vec<CacheKey> {
        self.index
            .read()
            .get(parent)
            .map(|entry| entry.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every entry whose `strategy:selector` matches the glob, and
    /// all of their descendants. Returns the number removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let removed = {
            let mut index = self.index.write();
            let roots: Vec<CacheKey> = index
                .keys()
                .filter(|key| glob_match(pattern, &key.to_string()))
                .cloned()
                .collect();
            let mut removed = Vec::new();
            for root in roots {
                removed.extend(index.remove_cascade(&root));
            }
            Self::debug_check(&index);
            removed
        };
        CacheStats::add(&self.stats.invalidations, removed.len());
        log::debug!("invalidated {} entries for {pattern}", removed.len());

        if let Some(remote) = &self.remote {
            remote.flush(pattern).await;
            for key in removed.iter().filter(|k| !glob_match(pattern, &k.to_string())) {
                remote.remove(key).await;
            }
        }
        removed.len()
    }

    /// Remove one key and its descendants. Returns the number removed.
    pub async fn invalidate_key(&self, key: &CacheKey) -> usize {
        let removed = {
            let mut index = self.index.write();
            let removed = index.remove_cascade(key);
            Self::debug_check(&index);
            removed
        };
        CacheStats::add(&self.stats.invalidations, removed.len());

        if let Some(remote) = &self.remote {
            remote.remove(key).await;
            for descendant in removed.iter().filter(|k| *k != key) {
                remote.remove(descendant).await;
            }
        }
        removed.len()
    }

    /// Remove every index-qualified key of one multi-element query, and
    /// their descendants. Returns the number removed.
    pub async fn invalidate_indexed(&self, strategy: LocatorStrategy, selector: &str) -> usize {
        let removed = {
            let mut index = self.index.write();
            let roots: Vec<CacheKey> = index
                .keys()
                .filter(|key| {
                    key.index.is_some() && key.strategy == strategy && key.selector == selector
                })
                .cloned()
                .collect();
            let mut removed = Vec::new();
            for root in roots {
                removed.extend(index.remove_cascade(&root));
            }
            Self::debug_check(&index);
            removed
        };
        CacheStats::add(&self.stats.invalidations, removed.len());

        if let Some(remote) = &self.remote {
            for key in &removed {
                remote.remove(key).await;
            }
        }
        removed.len()
    }

    fn prune_locked(&self, index: &mut CacheIndex, count: usize) -> usize {
        let removable = index.len().saturating_sub(self.config.min_resident_entries);
        let count = count.min(removable);
        if count == 0 {
            return 0;
        }
        for key in index.oldest_keys(count) {
            index.remove(&key);
        }
        Self::debug_check(index);
        CacheStats::add(&self.stats.evictions, count);
        count
    }

    /// Remove the least recently accessed share of entries.
    ///
    /// `None` uses the configured percentage. Never goes below
    /// `min_resident_entries`. Returns the number removed.
    pub fn prune(&self, percentage: Option<f64>) -> usize {
        let percentage = percentage
            .unwrap_or(self.config.prune_percentage)
            .clamp(0.0, 1.0);
        let mut index = self.index.write();
        let count = (index.len() as f64 * percentage).ceil() as usize;
        let pruned = self.prune_locked(&mut index, count);
        if pruned > 0 {
            log::debug!("pruned {pruned} entries ({:.0}%)", percentage * 100.0);
        }
        pruned
    }

    /// Prune back under the soft cap, by at least the configured percentage.
    fn enforce_cap(&self) -> usize {
        let mut index = self.index.write();
        let len = index.len();
        if len <= self.config.max_entries {
            return 0;
        }
        let by_share = (len as f64 * self.config.prune_percentage).ceil() as usize;
        let count = by_share.max(len - self.config.max_entries);
        self.prune_locked(&mut index, count)
    }

    /// Shed entries for a pressure signal.
    pub async fn on_pressure(&self, level: PressureLevel) -> usize {
        let tiers = self.config.pressure_tiers;
        let percentage = match level {
            PressureLevel::Moderate => tiers.moderate,
            PressureLevel::Critical => tiers.critical,
        };
        let pruned = self.prune(Some(percentage));
        log::info!("{level:?} pressure: pruned {pruned} entries");

        if level == PressureLevel::Critical {
            if let Some(remote) = &self.remote {
                remote.optimize().await;
            }
        }
        pruned
    }

    /// Expire stale entries, enforce the soft cap and optionally reconcile
    /// the remote tier.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if self.is_disposed() {
            return report;
        }

        let expired = {
            let now = Instant::now();
            let mut index = self.index.write();
            let expired = index.expired_keys(now, self.config.ttl);
            for key in &expired {
                index.remove(key);
            }
            Self::debug_check(&index);
            expired
        };
        report.expired = expired.len();
        CacheStats::add(&self.stats.expirations, expired.len());
        report.pruned = self.enforce_cap();

        if let Some(remote) = &self.remote {
            for key in &expired {
                remote.remove(key).await;
            }

            if self.config.remote_sync_on_maintenance {
                let records: Vec<RemoteRecord> = self
                    .index
                    .read()
                    .entries()
                    .map(RemoteRecord::from_entry)
                    .collect();
                for record in records {
                    if remote.exists(&record.key).await {
                        if remote.set_expiry(&record.key, remote.ttl_secs()).await {
                            report.refreshed += 1;
                        }
                    } else if remote.set(&record, None).await {
                        report.remirrored += 1;
                    }
                }
            }
        }

        if report.is_empty() {
            log::trace!("cache maintenance: nothing to do");
        } else {
            log::info!(
                "cache maintenance: {} expired, {} pruned, {} remirrored, {} refreshed",
                report.expired,
                report.pruned,
                report.remirrored,
                report.refreshed
            );
        }
        report
    }

    fn spawn_maintenance(cache: Weak<Self>, period: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                cache.run_maintenance().await;
            }
        })
    }

    fn spawn_pressure_listener(cache: Weak<Self>, pressure: &PressureNotifier) -> JoinHandle<()> {
        let mut signals = pressure.subscribe();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(level) => {
                        let Some(cache) = cache.upgrade() else { break };
                        cache.on_pressure(level).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        log::debug!("element cache missed {missed} pressure signals");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Empty the primary tier and flush this namespace from the remote tier.
    pub async fn clear(&self) {
        let cleared = self.index.write().clear();
        log::debug!("cache cleared ({cleared} entries)");
        if let Some(remote) = &self.remote {
            remote.flush("*").await;
        }
    }

    /// Stop background tasks, drop all entries and release the remote tier.
    ///
    /// Later lookups miss and later inserts are ignored.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.index.write().clear();
        if let Some(remote) = &self.remote {
            remote.dispose().await;
        }
        log::debug!("element cache disposed");
    }
}

impl Drop for ElementCache {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteStoreConfig;
    use crate::remote::{MemoryBackend, RemoteBackend};
    use crate::test_support::{MockDriver, MockElement};
    use std::time::Duration;

    const ID: LocatorStrategy = LocatorStrategy::AccessibilityId;

    fn quiet_config() -> CacheConfig {
        CacheConfig::new().with_prune_interval(Duration::from_secs(3600))
    }

    fn el(id: &str) -> ElementRef {
        ElementRef::new(id)
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let cache = ElementCache::new(quiet_config());
        cache.put(ID, "login", el("first"), None, None).await;
        cache.put(ID, "login", el("second"), None, None).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(ID, "login").await, Some(el("first")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_timestamp() {
        let cache = ElementCache::new(quiet_config().with_ttl(Duration::from_secs(10)));
        let key = cache.put(ID, "login", el("a"), None, None).await;
        let inserted = cache.entry(&key).unwrap().last_accessed;

        tokio::time::advance(Duration::from_secs(5)).await;
        cache.put(ID, "login", el("b"), None, None).await;
        let entry = cache.entry(&key).unwrap();
        assert!(entry.last_accessed > inserted);
        assert_eq!(entry.created_at, inserted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_clears_every_index() {
        let driver = Arc::new(MockDriver::new());
        let element = driver.add(
            MockElement::new("XCUIElementTypeButton").attr("identifier", "login_button"),
        );
        let cache = ElementCache::builder(quiet_config().with_ttl(Duration::from_secs(30)))
            .reader(driver.clone())
            .build();

        let form = cache.put(ID, "form", el("form"), None, None).await;
        cache
            .put(ID, "login_button", element.clone(), Some(&form), None)
            .await;
        assert_eq!(cache.get_by_identifier("login_button").await, Some(element.clone()));
        assert_eq!(cache.get_by_category(ElementCategory::Button), vec![element]);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(ID, "login_button").await, None);
        assert_eq!(cache.get_by_identifier("login_button").await, None);
        assert!(cache.get_by_category(ElementCategory::Button).is_empty());
        assert!(cache.children_of(&form).is_empty());
        assert_eq!(cache.stats().expirations(), 1);
    }

    #[tokio::test]
    async fn test_cascading_invalidation() {
        let cache = ElementCache::new(quiet_config());
        let parent = cache.put(ID, "settings_list", el("p"), None, None).await;
        cache.put(ID, "child_one", el("c1"), Some(&parent), None).await;
        cache.put(ID, "child_two", el("c2"), Some(&parent), None).await;
        let other = cache.put(ID, "other", el("o"), None, None).await;

        assert_eq!(cache.invalidate("*child_one").await, 1);
        assert!(cache.contains(&parent));
        assert_eq!(cache.children_of(&parent).len(), 1);

        assert_eq!(cache.invalidate("accessibility id:settings_*").await, 2);
        assert_eq!(cache.keys(), vec![other]);
        assert_eq!(cache.stats().invalidations(), 3);
    }

    #[tokio::test]
    async fn test_metadata_overrides_probing() {
        let cache = ElementCache::new(quiet_config());
        let mut metadata = Metadata::new();
        metadata.insert("identifier".into(), "email_field".into());
        metadata.insert("category".into(), "text_field".into());
        cache
            .put(ID, "Email", el("e"), None, Some(metadata))
            .await;

        assert_eq!(cache.get_by_identifier("email_field").await, Some(el("e")));
        assert_eq!(cache.get_by_category(ElementCategory::TextField), vec![el("e")]);
    }

    #[tokio::test]
    async fn test_read_failure_does_not_fail_insert() {
        let driver = Arc::new(MockDriver::new());
        let broken = driver.add(MockElement::new("XCUIElementTypeButton").broken());
        let cache = ElementCache::builder(quiet_config()).reader(driver).build();

        cache.put(ID, "ghost", broken.clone(), None, None).await;
        assert_eq!(cache.get(ID, "ghost").await, Some(broken));
        assert!(cache.get_by_category(ElementCategory::Button).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_removes_oldest_and_respects_floor() {
        let cache = ElementCache::new(quiet_config().with_min_resident_entries(3));
        for i in 0..5 {
            cache.put(ID, &format!("k{i}"), el(&format!("e{i}")), None, None).await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        // touching k0 makes k1 the oldest
        cache.get(ID, "k0").await;

        assert_eq!(cache.prune(Some(0.4)), 2);
        assert!(!cache.contains(&CacheKey::new(ID, "k1")));
        assert!(!cache.contains(&CacheKey::new(ID, "k2")));
        assert!(cache.contains(&CacheKey::new(ID, "k0")));

        assert_eq!(cache.prune(Some(1.0)), 0);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions(), 2);
    }

    #[tokio::test]
    async fn test_soft_cap_prunes_on_insert() {
        let cache = ElementCache::new(quiet_config().with_max_entries(4));
        for i in 0..10 {
            cache.put(ID, &format!("k{i}"), el(&format!("e{i}")), None, None).await;
        }
        assert!(cache.len() <= 4);
        assert!(cache.contains(&CacheKey::new(ID, "k9")));
    }

    #[tokio::test]
    async fn test_remote_tier_fallback_and_failure_isolation() {
        let backend = Arc::new(MemoryBackend::new());
        let remote = RemoteStoreAdapter::new(backend.clone(), RemoteStoreConfig::default());
        let writer = ElementCache::builder(quiet_config()).remote(remote.clone()).build();
        let reader = ElementCache::builder(quiet_config()).remote(remote).build();

        writer.put(ID, "shared", el("s"), None, None).await;
        assert_eq!(reader.get(ID, "shared").await, Some(el("s")));
        assert_eq!(reader.stats().remote_hits(), 1);
        assert!(reader.contains(&CacheKey::new(ID, "shared")));

        backend.set_reachable(false);
        writer.put(ID, "local_only", el("l"), None, None).await;
        assert_eq!(writer.get(ID, "local_only").await, Some(el("l")));
        assert_eq!(writer.get(ID, "missing").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_flushes_remote_descendants() {
        let backend = Arc::new(MemoryBackend::new());
        let remote = RemoteStoreAdapter::new(backend.clone(), RemoteStoreConfig::default());
        let cache = ElementCache::builder(quiet_config()).remote(remote).build();

        let parent = cache.put(ID, "form", el("f"), None, None).await;
        cache.put(ID, "email", el("e"), Some(&parent), None).await;
        assert_eq!(backend.len(), 2);

        cache.invalidate("accessibility id:form").await;
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_indexed_drops_one_query() {
        let cache = ElementCache::new(quiet_config());
        let cells = LocatorStrategy::ClassName;
        for i in 0..3 {
            cache
                .put_key(CacheKey::indexed(cells, "XCUIElementTypeCell", i), el(&format!("c{i}")), None, None)
                .await;
        }
        cache
            .put_key(CacheKey::indexed(cells, "XCUIElementTypeButton", 0), el("b"), None, None)
            .await;
        cache.put(cells, "XCUIElementTypeCell", el("single"), None, None).await;

        assert_eq!(cache.invalidate_indexed(cells, "XCUIElementTypeCell").await, 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&CacheKey::new(cells, "XCUIElementTypeCell")));
        assert!(cache.contains(&CacheKey::indexed(cells, "XCUIElementTypeButton", 0)));
    }

    #[tokio::test]
    async fn test_maintenance_remirrors_lost_records() {
        let backend = Arc::new(MemoryBackend::new());
        let remote = RemoteStoreAdapter::new(backend.clone(), RemoteStoreConfig::default());
        let cache = ElementCache::builder(quiet_config().with_remote_sync(true))
            .remote(remote)
            .build();

        cache.put(ID, "a", el("a"), None, None).await;
        cache.put(ID, "b", el("b"), None, None).await;
        backend.del_matching("*:a").await.unwrap();

        let report = cache.run_maintenance().await;
        assert_eq!(report.remirrored, 1);
        assert_eq!(report.refreshed, 1);
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn test_pressure_signal_prunes() {
        let pressure = PressureNotifier::new();
        let cache = ElementCache::builder(quiet_config().with_pressure_tiers(0.25, 0.5))
            .pressure(pressure.clone())
            .build();
        for i in 0..8 {
            cache.put(ID, &format!("k{i}"), el(&format!("e{i}")), None, None).await;
        }

        pressure.notify(PressureLevel::Critical);
        for _ in 0..50 {
            if cache.len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test]
    async fn test_dispose_stops_everything() {
        let pressure = PressureNotifier::new();
        let cache = ElementCache::builder(quiet_config())
            .pressure(pressure.clone())
            .build();
        cache.put(ID, "a", el("a"), None, None).await;

        cache.dispose().await;
        assert!(cache.is_disposed());
        assert!(cache.is_empty());
        assert!(!cache.put_key(CacheKey::new(ID, "b"), el("b"), None, None).await);
        assert_eq!(cache.get(ID, "a").await, None);

        for _ in 0..10 {
            if pressure.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pressure.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_keep_indices_consistent() {
        let cache = ElementCache::new(quiet_config().with_max_entries(50));
        let mut handles = Vec::new();

        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for step in 0..200 {
                    let n = fastrand::usize(0..60);
                    let mut metadata = Metadata::new();
                    metadata.insert("identifier".into(), format!("id{}", n % 7).into());
                    metadata.insert("category".into(), "button".into());
                    match fastrand::u8(0..4) {
                        0 | 1 => {
                            let parent = CacheKey::new(ID, format!("k{}", n / 2));
                            cache
                                .put(ID, &format!("k{n}"), el(&format!("w{worker}s{step}")), Some(&parent), Some(metadata))
                                .await;
                        }
                        2 => {
                            cache.get(ID, &format!("k{n}")).await;
                        }
                        _ => {
                            cache.invalidate(&format!("*k{n}")).await;
                        }
                    }
                }
            }));
        }
        for result in futures::future::join_all(handles).await {
            result.unwrap();
        }

        assert!(cache.index.read().check_invariants().is_ok());
        assert!(cache.len() <= 50);
    }
}
