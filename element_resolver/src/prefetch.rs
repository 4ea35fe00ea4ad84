//! Related-element prefetch.
//!
//! Resolving a form field usually precedes filling its neighbours, and a
//! tapped row is usually followed by another. After a hub element resolves
//! we query the related categories in the background and cache the results
//! as children of the hub, so invalidating the hub drops them too.
//!
//! Related keys are scoped to their hub (`class name#i:<class>@<hub>`). They
//! are reached through the hub's children or the category index, never
//! sent to the driver.

use crate::cache::{ElementCache, Metadata};
use crate::config::PrefetchConfig;
use crate::driver::Driver;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use element_resolver_types::{
    CacheKey, ElementCategory, ElementRef, HubKind, LocatorStrategy, Platform,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};

/// Deduplicated, bounded background prefetch of related elements.
#[derive(Debug)]
pub struct PrefetchManager {
    /// Hubs with a prefetch in flight.
    in_progress: Arc<DashMap<CacheKey, Option<AbortHandle>>>,
    /// Bounds concurrent prefetch tasks.
    semaphore: Arc<Semaphore>,
    config: PrefetchConfig,
    platform: Platform,
}

impl PrefetchManager {
    /// Create a manager for a platform's class names.
    pub fn new(config: PrefetchConfig, platform: Platform) -> Self {
        Self {
            in_progress: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            platform,
        }
    }

    /// Number of prefetches still running.
    pub fn in_flight(&self) -> usize {
        self.in_progress.len()
    }

    /// Start prefetching the elements related to `hub`.
    ///
    /// Returns `None` when a prefetch for the same hub is already running.
    /// The task resolves to the number of elements cached; failures are
    /// logged and count as zero.
    pub fn prefetch<D>(
        &self,
        driver: Arc<D>,
        cache: Arc<ElementCache>,
        hub: CacheKey,
        kind: HubKind,
    ) -> Option<JoinHandle<usize>>
    where
        D: Driver + 'static,
    {
        match self.in_progress.entry(hub.clone()) {
            Entry::Occupied(_) => {
                log::trace!("prefetch for {hub} already running");
                return None;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(None);
            }
        }

        let semaphore = self.semaphore.clone();
        let in_progress = self.in_progress.clone();
        let platform = self.platform;
        let max_related = self.config.max_related;
        let hub_key = hub.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire().await.ok();
            let queries = kind.related_categories().iter().filter_map(|category| {
                let class_name = category.class_name(platform)?;
                let driver = driver.clone();
                Some(async move {
                    let found = driver.find_all(LocatorStrategy::ClassName, class_name).await;
                    (*category, class_name, found)
                })
            });

            let results = futures::future::join_all(queries).await;

            // replace whatever an earlier prefetch of this hub left behind
            for stale in cache.children_of(&hub_key) {
                cache.invalidate_key(&stale).await;
            }

            let mut cached = 0;
            for (category, class_name, found) in results {
                match found {
                    Ok(elements) => {
                        cached +=
                            cache_related(&cache, &hub_key, category, class_name, elements, max_related)
                                .await;
                    }
                    Err(e) => log::warn!("prefetch of {class_name} for {hub_key} failed: {e}"),
                }
            }

            log::debug!("prefetched {cached} elements related to {hub_key}");
            in_progress.remove(&hub_key);
            cached
        });

        if let Some(mut slot) = self.in_progress.get_mut(&hub) {
            *slot = Some(handle.abort_handle());
        }
        Some(handle)
    }

    /// Abort every running prefetch.
    pub fn cancel_all(&self) {
        self.in_progress.retain(|_, handle| {
            if let Some(handle) = handle {
                handle.abort();
            }
            false
        });
    }
}

/// Key of the `index`-th related element of `hub`.
fn related_key(hub: &CacheKey, class_name: &str, index: usize) -> CacheKey {
    CacheKey::indexed(LocatorStrategy::ClassName, format!("{class_name}@{hub}"), index)
}

async fn cache_related(
    cache: &ElementCache,
    hub: &CacheKey,
    category: ElementCategory,
    class_name: &str,
    elements: Vec<ElementRef>,
    max_related: usize,
) -> usize {
    let mut cached = 0;
    for (index, element) in elements.into_iter().take(max_related).enumerate() {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), category.as_str().into());
        metadata.insert("prefetched_for".into(), hub.to_string().into());

        let key = related_key(hub, class_name, index);
        if cache.put_key(key, element, Some(hub), Some(metadata)).await {
            cached += 1;
        }
    }
    cached
}

impl Drop for PrefetchManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
