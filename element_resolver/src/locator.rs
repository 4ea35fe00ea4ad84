//! Element resolution: cache first, then the driver, then fallbacks.
//!
//! Per request:
//!
//! ```text
//! cache lookup ── hit ──────────────────────────────────────────▶ return
//!      │ miss
//!      ▼
//! direct lookup ── found ─────────────────────────▶ cache write ─▶ return
//!      │ not found
//!      ▼
//! text fallback ── found (ranked) ────────────────▶ cache write ─▶ return
//!      │
//!      ▼
//! prediction fallback ── found ───────────────────▶ cache write ─▶ return
//!      │
//!      └─ retry after the interval until attempts or the deadline run out
//! ```

use crate::cache::{ElementCache, Metadata};
use crate::config::{CacheConfig, LocatorConfig, LocatorOptions};
use crate::driver::Driver;
use crate::error::{LocatorError, LocatorResult};
use crate::pattern::PatternLearner;
#[cfg(feature = "prefetch")]
use crate::prefetch::PrefetchManager;
use crate::pressure::PressureNotifier;
use crate::rank::Ranker;
use crate::remote::RemoteStoreAdapter;
use element_resolver_types::{
    looks_like_identifier, xpath_literal, CacheKey, ElementRef, HubKind, LocatorStrategy,
    PatternModel, Prediction,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// XPath matching any element whose label, text, name or value contains `text`.
pub fn text_search_xpath(text: &str) -> String {
    let literal = xpath_literal(text);
    format!(
        "//*[contains(@label, {literal}) or contains(@text, {literal}) \
         or contains(@name, {literal}) or contains(@value, {literal})]"
    )
}

/// Text the fallback searches for: the caller's criteria, or the selector
/// itself when it was meant as an identifier.
fn text_query(strategy: LocatorStrategy, selector: &str, options: &LocatorOptions) -> Option<String> {
    explicit_criteria(options)
        .map(str::to_string)
        .or_else(|| derived_text_query(strategy, selector, options))
}

fn explicit_criteria(options: &LocatorOptions) -> Option<&str> {
    options
        .text_criteria
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// The selector doubles as the text query only for identifier-like lookups
/// without explicit criteria. Only then is the text-search key a valid
/// answer for the request.
fn derived_text_query(
    strategy: LocatorStrategy,
    selector: &str,
    options: &LocatorOptions,
) -> Option<String> {
    (explicit_criteria(options).is_none() && strategy.is_identifier_like())
        .then(|| selector.to_string())
}

/// Builder for [`Locator`].
pub struct LocatorBuilder<D> {
    driver: Arc<D>,
    config: LocatorConfig,
    cache_config: CacheConfig,
    cache: Option<Arc<ElementCache>>,
    remote: Option<Arc<RemoteStoreAdapter>>,
    pressure: Option<PressureNotifier>,
    ranker: Ranker,
    learner: PatternLearner,
}

impl<D: Driver + 'static> LocatorBuilder<D> {
    /// Locator settings.
    pub fn config(mut self, config: LocatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Policy for the cache the locator creates.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Share an existing cache instead of creating one.
    pub fn cache(mut self, cache: Arc<ElementCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Remote tier for the cache the locator creates.
    pub fn remote(mut self, remote: Arc<RemoteStoreAdapter>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Pressure signals for the cache the locator creates.
    pub fn pressure(mut self, pressure: PressureNotifier) -> Self {
        self.pressure = Some(pressure);
        self
    }

    /// Custom ranker.
    pub fn ranker(mut self, ranker: Ranker) -> Self {
        self.ranker = ranker;
        self
    }

    /// Custom pattern learner.
    pub fn learner(mut self, learner: PatternLearner) -> Self {
        self.learner = learner;
        self
    }

    /// Build the locator.
    pub fn build(self) -> Locator<D> {
        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                let mut builder = ElementCache::builder(self.cache_config).reader(self.driver.clone());
                if let Some(remote) = self.remote {
                    builder = builder.remote(remote);
                }
                if let Some(pressure) = self.pressure {
                    builder = builder.pressure(pressure);
                }
                builder.build()
            }
        };

        Locator {
            #[cfg(feature = "prefetch")]
            prefetch: PrefetchManager::new(self.config.prefetch.clone(), self.config.platform),
            driver: self.driver,
            cache,
            ranker: self.ranker,
            learner: self.learner,
            config: self.config,
            disposed: AtomicBool::new(false),
        }
    }
}

/// Resolves locator queries against a driver with caching, ranking and
/// prediction-assisted fallback.
pub struct Locator<D> {
    driver: Arc<D>,
    cache: Arc<ElementCache>,
    ranker: Ranker,
    learner: PatternLearner,
    #[cfg(feature = "prefetch")]
    prefetch: PrefetchManager,
    config: LocatorConfig,
    disposed: AtomicBool,
}

impl<D> std::fmt::Debug for Locator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .field("trained", &self.learner.is_trained())
            .finish()
    }
}

impl<D: Driver + 'static> Locator<D> {
    /// A locator with default settings and its own primary-tier cache.
    pub fn new(driver: Arc<D>) -> Self {
        Self::builder(driver).build()
    }

    /// Start building a locator.
    pub fn builder(driver: Arc<D>) -> LocatorBuilder<D> {
        LocatorBuilder {
            driver,
            config: LocatorConfig::default(),
            cache_config: CacheConfig::default(),
            cache: None,
            remote: None,
            pressure: None,
            ranker: Ranker::default(),
            learner: PatternLearner::default(),
        }
    }

    /// The underlying driver.
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// The cache in use.
    pub fn cache(&self) -> &Arc<ElementCache> {
        &self.cache
    }

    /// Settings in effect.
    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    fn ensure_live(&self) -> LocatorResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(LocatorError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Resolve a single element.
    ///
    /// `None` options use the configured defaults. Fails with
    /// [`LocatorError::NotFound`] once every attempt is spent, or
    /// [`LocatorError::Timeout`] when the deadline runs out first.
    pub async fn find_element(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: Option<LocatorOptions>,
    ) -> LocatorResult<ElementRef> {
        self.ensure_live()?;
        let options = options.unwrap_or_else(|| self.config.default_options.clone());
        let started = Instant::now();
        let deadline = started + options.timeout;

        let resolution = async {
            if let Some(element) = self.cached(strategy, selector, &options).await {
                return Ok(element);
            }
            self.resolve_with_retries(strategy, selector, &options).await
        };

        match tokio::time::timeout_at(deadline, resolution).await {
            Ok(result) => result,
            Err(_) => {
                log::debug!("resolution of {strategy}:{selector} ran out of time");
                Err(LocatorError::Timeout {
                    strategy,
                    selector: selector.to_string(),
                    elapsed: started.elapsed(),
                })
            }
        }
    }

    async fn cached(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: &LocatorOptions,
    ) -> Option<ElementRef> {
        if let Some(element) = self.cache.get(strategy, selector).await {
            return Some(element);
        }
        let query = derived_text_query(strategy, selector, options)?;
        self.cache
            .get(LocatorStrategy::XPath, &text_search_xpath(&query))
            .await
    }

    async fn resolve_with_retries(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: &LocatorOptions,
    ) -> LocatorResult<ElementRef> {
        let attempts = options.retries + 1;

        for attempt in 1..=attempts {
            self.ensure_live()?;
            if let Some(element) = self.attempt(strategy, selector, options).await {
                return Ok(element);
            }
            if attempt < attempts {
                log::debug!(
                    "{strategy}:{selector} not found (attempt {attempt}/{attempts}), retrying in {:?}",
                    options.retry_interval
                );
                tokio::time::sleep(options.retry_interval).await;
            }
        }

        Err(LocatorError::NotFound {
            strategy,
            selector: selector.to_string(),
            attempts,
        })
    }

    /// One pass over direct lookup and the fallbacks.
    async fn attempt(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: &LocatorOptions,
    ) -> Option<ElementRef> {
        match self.driver.find_one(strategy, selector).await {
            Ok(element) => {
                log::debug!("resolved {strategy}:{selector} directly");
                let key = self
                    .cache
                    .put(strategy, selector, element.clone(), None, None)
                    .await;
                self.after_resolve(&key, selector, options);
                return Some(element);
            }
            Err(e) => log::trace!("direct lookup of {strategy}:{selector} failed: {e}"),
        }

        if let Some(query) = text_query(strategy, selector, options) {
            if let Some((element, text_key)) = self.text_fallback(&query, options).await {
                log::debug!("resolved {strategy}:{selector} by text {query:?}");
                // hang the request key off the text key so invalidating
                // either drops both
                let key = self
                    .cache
                    .put(strategy, selector, element.clone(), Some(&text_key), None)
                    .await;
                self.after_resolve(&key, selector, options);
                return Some(element);
            }
        }

        if options.predict && strategy.is_identifier_like() && !looks_like_identifier(selector) {
            if let Some(element) = self.prediction_fallback(strategy, selector).await {
                return Some(element);
            }
        }

        None
    }

    /// Search by text, rank the candidates and cache the best one under the
    /// text-search key.
    async fn text_fallback(
        &self,
        query: &str,
        options: &LocatorOptions,
    ) -> Option<(ElementRef, CacheKey)> {
        let xpath = text_search_xpath(query);
        let candidates = match self.driver.find_all(LocatorStrategy::XPath, &xpath).await {
            Ok(candidates) if !candidates.is_empty() => candidates,
            Ok(_) => return None,
            Err(e) => {
                log::trace!("text search for {query:?} failed: {e}");
                return None;
            }
        };

        let best = if options.rank && candidates.len() > 1 {
            let count = candidates.len();
            let best = self
                .ranker
                .best_match(self.driver.as_ref(), candidates, Some(query), options.fuzzy)
                .await?;
            log::debug!(
                "ranked {count} text candidates for {query:?}, best {} ({:.2})",
                best.element,
                best.score
            );
            best.element
        } else {
            candidates.into_iter().next()?
        };

        let key = self
            .cache
            .put(LocatorStrategy::XPath, &xpath, best.clone(), None, None)
            .await;
        Some((best, key))
    }

    /// Try identifiers the learned templates derive from free text.
    async fn prediction_fallback(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> Option<ElementRef> {
        for prediction in self.learner.candidate_identifiers(selector) {
            let Some(identifier) = prediction.identifier else {
                continue;
            };
            let Ok(element) = self
                .driver
                .find_one(LocatorStrategy::AccessibilityId, &identifier)
                .await
            else {
                continue;
            };

            log::debug!(
                "resolved {strategy}:{selector} via predicted identifier {identifier} ({:.2})",
                prediction.confidence
            );
            let mut metadata = Metadata::new();
            metadata.insert("identifier".into(), identifier.into());
            metadata.insert("predicted_confidence".into(), prediction.confidence.into());
            if let Some(template) = prediction.template {
                metadata.insert("template".into(), template.into());
            }
            self.cache
                .put(strategy, selector, element.clone(), None, Some(metadata))
                .await;
            return Some(element);
        }
        None
    }

    #[cfg(feature = "prefetch")]
    fn after_resolve(&self, key: &CacheKey, selector: &str, options: &LocatorOptions) {
        if !options.prefetch_related {
            return;
        }
        if let Some(kind) = HubKind::detect(selector) {
            log::trace!("{selector} looks like a {kind:?} hub, prefetching related elements");
            self.prefetch.prefetch(
                self.driver.clone(),
                self.cache.clone(),
                key.clone(),
                kind,
            );
        }
    }

    #[cfg(not(feature = "prefetch"))]
    fn after_resolve(&self, _key: &CacheKey, selector: &str, options: &LocatorOptions) {
        if options.prefetch_related && HubKind::detect(selector).is_some() {
            log::debug!("related-element prefetch requested but the prefetch feature is disabled");
        }
    }

    /// Resolve every match of a query.
    ///
    /// No retries and no fallbacks. With text criteria and ranking on the
    /// matches come back best first. Each match is cached under an
    /// index-qualified key, replacing whatever the previous run cached.
    pub async fn find_elements(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: Option<LocatorOptions>,
    ) -> LocatorResult<Vec<ElementRef>> {
        self.ensure_live()?;
        let options = options.unwrap_or_else(|| self.config.default_options.clone());
        let started = Instant::now();

        let found = match tokio::time::timeout(options.timeout, self.driver.find_all(strategy, selector)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                log::debug!("find_elements {strategy}:{selector} failed: {e}");
                return Err(LocatorError::NotFound {
                    strategy,
                    selector: selector.to_string(),
                    attempts: 1,
                });
            }
            Err(_) => {
                return Err(LocatorError::Timeout {
                    strategy,
                    selector: selector.to_string(),
                    elapsed: started.elapsed(),
                })
            }
        };

        let criteria = options.text_criteria.as_deref();
        let found = if options.rank && criteria.is_some() && found.len() > 1 {
            self.ranker
                .rank(self.driver.as_ref(), found, criteria, options.fuzzy)
                .await
                .into_iter()
                .map(|ranked| ranked.element)
                .collect()
        } else {
            found
        };

        // a re-query replaces the previous result set
        self.cache.invalidate_indexed(strategy, selector).await;
        for (index, element) in found.iter().enumerate() {
            self.cache
                .put_key(
                    CacheKey::indexed(strategy, selector, index),
                    element.clone(),
                    None,
                    None,
                )
                .await;
        }
        log::debug!("find_elements {strategy}:{selector}: {} matches", found.len());
        Ok(found)
    }

    /// Drop a cached resolution and resolve it again from the driver.
    pub async fn refresh(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
        options: Option<LocatorOptions>,
    ) -> LocatorResult<ElementRef> {
        self.ensure_live()?;
        let options = options.unwrap_or_else(|| self.config.default_options.clone());
        self.cache
            .invalidate_key(&CacheKey::new(strategy, selector))
            .await;
        if let Some(query) = text_query(strategy, selector, &options) {
            self.cache
                .invalidate_key(&CacheKey::new(LocatorStrategy::XPath, text_search_xpath(&query)))
                .await;
        }
        self.find_element(strategy, selector, Some(options)).await
    }

    /// Invalidate cached entries matching a glob over `strategy:selector`,
    /// with their descendants. Returns the number removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern).await
    }

    /// Empty the cache.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Resolve and cache an element ahead of use. Returns whether it resolved.
    pub async fn preload(&self, strategy: LocatorStrategy, selector: &str) -> bool {
        match self.find_element(strategy, selector, None).await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("preload of {strategy}:{selector} failed: {e}");
                false
            }
        }
    }

    /// Learn identifier templates from the elements a query matches.
    ///
    /// Returns the number of templates retained. A failing query leaves the
    /// model untouched.
    pub async fn learn_patterns(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> LocatorResult<usize> {
        self.ensure_live()?;
        match self.driver.find_all(strategy, selector).await {
            Ok(elements) => Ok(self.learner.learn(self.driver.as_ref(), &elements).await),
            Err(e) => {
                log::warn!("pattern learning query {strategy}:{selector} failed: {e}");
                Ok(0)
            }
        }
    }

    /// Snapshot of the learned model.
    pub fn pattern_model(&self) -> PatternModel {
        self.learner.model()
    }

    /// Predict the identifier of an element that lacks one.
    pub async fn predict_identifier(&self, element: &ElementRef) -> Prediction {
        self.learner.predict(self.driver.as_ref(), element).await
    }

    /// Stop prefetching, dispose the cache and refuse further requests.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        #[cfg(feature = "prefetch")]
        self.prefetch.cancel_all();
        self.cache.dispose().await;
        log::debug!("locator disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockDriver, MockElement};
    use std::time::Duration;

    const ID: LocatorStrategy = LocatorStrategy::AccessibilityId;

    fn quick() -> LocatorOptions {
        LocatorOptions::new()
            .with_retries(0)
            .with_retry_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_direct_hit_is_cached() {
        let driver = Arc::new(MockDriver::new());
        let login = driver.add(MockElement::new("XCUIElementTypeButton").attr("identifier", "login_button"));
        driver.answer(ID, "login_button", vec![login.clone()]);
        let locator = Locator::new(driver.clone());

        assert_eq!(locator.find_element(ID, "login_button", None).await.unwrap(), login);
        assert_eq!(driver.total_calls(), 1);
        assert_eq!(locator.find_element(ID, "login_button", None).await.unwrap(), login);
        assert_eq!(driver.total_calls(), 1);
        assert_eq!(locator.cache().get_by_identifier("login_button").await, Some(login));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let driver = Arc::new(MockDriver::new());
        let locator = Locator::new(driver.clone());
        let options = LocatorOptions::new()
            .with_retries(3)
            .with_retry_interval(Duration::from_millis(100));

        let err = locator
            .find_element(LocatorStrategy::XPath, "//missing", Some(options))
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::NotFound { attempts: 4, .. }));
        assert_eq!(driver.find_one_calls(), 4);
        assert_eq!(driver.find_all_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_retries() {
        let driver = Arc::new(MockDriver::new());
        let locator = Locator::new(driver.clone());
        let options = LocatorOptions::new()
            .with_timeout(Duration::from_secs(1))
            .with_retries(100)
            .with_retry_interval(Duration::from_millis(400));

        let started = Instant::now();
        let err = locator
            .find_element(LocatorStrategy::XPath, "//missing", Some(options))
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::Timeout { .. }));
        assert!(err.is_not_found());
        assert!(started.elapsed() <= Duration::from_millis(1400));
        assert_eq!(driver.find_one_calls(), 3);
    }

    #[tokio::test]
    async fn test_text_fallback_ranks_and_caches_under_text_key() {
        let driver = Arc::new(MockDriver::new());
        let hidden = driver.add(MockElement::new("XCUIElementTypeButton").attr("label", "Sign in").hidden());
        let visible = driver.add(MockElement::new("XCUIElementTypeButton").attr("label", "Sign in"));
        driver.answer(LocatorStrategy::XPath, &text_search_xpath("Sign in"), vec![hidden, visible.clone()]);
        let locator = Locator::new(driver.clone());

        let options = quick().with_text("Sign in");
        let found = locator
            .find_element(LocatorStrategy::ClassName, "XCUIElementTypeButton", Some(options.clone()))
            .await
            .unwrap();
        assert_eq!(found, visible);
        assert!(locator
            .cache()
            .contains(&CacheKey::new(LocatorStrategy::XPath, text_search_xpath("Sign in"))));

        let calls = driver.total_calls();
        let again = locator
            .find_element(LocatorStrategy::ClassName, "XCUIElementTypeButton", Some(options))
            .await
            .unwrap();
        assert_eq!(again, visible);
        assert_eq!(driver.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_shared_text_criteria_do_not_cross_queries() {
        let driver = Arc::new(MockDriver::new());
        let button = driver.add(MockElement::new("XCUIElementTypeButton").text("Wi-Fi"));
        let cell = driver.add(MockElement::new("XCUIElementTypeCell").text("Wi-Fi"));
        driver.answer(LocatorStrategy::XPath, &text_search_xpath("Wi-Fi"), vec![button.clone()]);
        driver.answer(LocatorStrategy::ClassName, "XCUIElementTypeCell", vec![cell.clone()]);
        let locator = Locator::new(driver.clone());
        let options = quick().with_text("Wi-Fi");

        let first = locator
            .find_element(LocatorStrategy::ClassName, "XCUIElementTypeButton", Some(options.clone()))
            .await
            .unwrap();
        assert_eq!(first, button);

        let second = locator
            .find_element(LocatorStrategy::ClassName, "XCUIElementTypeCell", Some(options.clone()))
            .await
            .unwrap();
        assert_eq!(second, cell);

        // the text winner is cached under its own request key too
        let request_key = CacheKey::new(LocatorStrategy::ClassName, "XCUIElementTypeButton");
        let text_key = CacheKey::new(LocatorStrategy::XPath, text_search_xpath("Wi-Fi"));
        assert_eq!(locator.cache().children_of(&text_key), vec![request_key.clone()]);

        let calls = driver.total_calls();
        assert_eq!(
            locator
                .find_element(LocatorStrategy::ClassName, "XCUIElementTypeButton", Some(options))
                .await
                .unwrap(),
            button
        );
        assert_eq!(driver.total_calls(), calls);

        locator.cache().invalidate_key(&text_key).await;
        assert!(!locator.cache().contains(&request_key));
    }

    #[tokio::test]
    async fn test_ranking_off_takes_first_candidate() {
        let driver = Arc::new(MockDriver::new());
        let hidden = driver.add(MockElement::new("XCUIElementTypeButton").text("Go").hidden());
        let visible = driver.add(MockElement::new("XCUIElementTypeButton").text("Go"));
        driver.answer(LocatorStrategy::XPath, &text_search_xpath("Go"), vec![hidden.clone(), visible]);
        let locator = Locator::new(driver.clone());

        let found = locator
            .find_element(LocatorStrategy::XPath, "//go", Some(quick().with_text("Go").with_ranking(false)))
            .await
            .unwrap();
        assert_eq!(found, hidden);
    }

    #[tokio::test]
    async fn test_prediction_fallback_uses_learned_templates() {
        let driver = Arc::new(MockDriver::new());
        let known: Vec<ElementRef> = [("login_button", "Login"), ("help_button", "Help")]
            .into_iter()
            .map(|(id, label)| {
                driver.add(
                    MockElement::new("XCUIElementTypeButton")
                        .attr("identifier", id)
                        .attr("label", label),
                )
            })
            .collect();
        let cancel = driver.add(MockElement::new("XCUIElementTypeButton").attr("label", "Cancel"));
        driver.answer(LocatorStrategy::ClassName, "XCUIElementTypeButton", known);
        driver.answer(ID, "cancel_button", vec![cancel.clone()]);

        let locator = Locator::new(driver.clone());
        assert_eq!(
            locator
                .learn_patterns(LocatorStrategy::ClassName, "XCUIElementTypeButton")
                .await
                .unwrap(),
            1
        );
        assert!(!locator.pattern_model().is_empty());

        assert_eq!(locator.find_element(ID, "Cancel", Some(quick())).await.unwrap(), cancel);
        let calls = driver.total_calls();
        assert_eq!(locator.find_element(ID, "Cancel", Some(quick())).await.unwrap(), cancel);
        assert_eq!(driver.total_calls(), calls);

        let prediction = locator.predict_identifier(&cancel).await;
        assert_eq!(prediction.identifier.as_deref(), Some("cancel_button"));
    }

    #[tokio::test]
    async fn test_prediction_disabled_or_identifier_shaped() {
        let driver = Arc::new(MockDriver::new());
        let locator = Locator::new(driver.clone());
        locator
            .learner
            .learn_from_samples(&[element_resolver_types::ElementSample {
                category: element_resolver_types::ElementCategory::Button,
                identifier: "ok_button".into(),
                attributes: [("label".to_string(), "Ok".to_string())].into_iter().collect(),
            }]);

        // identifier-shaped selectors skip prediction: one direct lookup only
        assert!(locator.find_element(ID, "ok_btn", Some(quick())).await.is_err());
        assert_eq!(driver.find_one_calls(), 1);

        assert!(locator
            .find_element(ID, "Ok", Some(quick().with_prediction(false)))
            .await
            .is_err());
        assert_eq!(driver.find_one_calls(), 2);

        assert!(locator.find_element(ID, "Ok", Some(quick())).await.is_err());
        assert_eq!(driver.find_one_calls(), 4);
    }

    #[tokio::test]
    async fn test_driver_errors_degrade_to_not_found() {
        let driver = Arc::new(MockDriver::new());
        driver.set_offline(true);
        let locator = Locator::new(driver.clone());

        let err = locator.find_element(ID, "anything", Some(quick())).await.unwrap_err();
        assert!(matches!(err, LocatorError::NotFound { attempts: 1, .. }));
        assert!(locator.find_elements(ID, "anything", Some(quick())).await.is_err());
    }

    #[tokio::test]
    async fn test_find_elements_ranks_and_caches_indexed() {
        let driver = Arc::new(MockDriver::new());
        let other = driver.add(MockElement::new("XCUIElementTypeCell").text("Other"));
        let wifi = driver.add(MockElement::new("XCUIElementTypeCell").text("Wi-Fi"));
        driver.answer(LocatorStrategy::ClassName, "XCUIElementTypeCell", vec![other.clone(), wifi.clone()]);
        let locator = Locator::new(driver.clone());

        let found = locator
            .find_elements(LocatorStrategy::ClassName, "XCUIElementTypeCell", Some(quick().with_text("wi-fi")))
            .await
            .unwrap();
        assert_eq!(found, vec![wifi.clone(), other.clone()]);
        assert!(locator
            .cache()
            .contains(&CacheKey::indexed(LocatorStrategy::ClassName, "XCUIElementTypeCell", 0)));
        assert_eq!(locator.cache().len(), 2);

        assert!(locator
            .find_elements(LocatorStrategy::ClassName, "Nope", None)
            .await
            .unwrap()
            .is_empty());

        // fewer matches on the next run leave no stale positions behind
        driver.answer(LocatorStrategy::ClassName, "XCUIElementTypeCell", vec![other.clone()]);
        let found = locator
            .find_elements(LocatorStrategy::ClassName, "XCUIElementTypeCell", None)
            .await
            .unwrap();
        assert_eq!(found, vec![other.clone()]);
        assert_eq!(locator.cache().len(), 1);
        let first = CacheKey::indexed(LocatorStrategy::ClassName, "XCUIElementTypeCell", 0);
        assert_eq!(locator.cache().get_key(&first).await, Some(other));
    }

    #[tokio::test]
    async fn test_invalidate_and_refresh() {
        let driver = Arc::new(MockDriver::new());
        let first = driver.add(MockElement::new("XCUIElementTypeButton"));
        driver.answer(ID, "save", vec![first.clone()]);
        let locator = Locator::new(driver.clone());
        locator.find_element(ID, "save", None).await.unwrap();

        let second = driver.add(MockElement::new("XCUIElementTypeButton"));
        driver.answer(ID, "save", vec![second.clone()]);
        assert_eq!(locator.find_element(ID, "save", None).await.unwrap(), first);
        assert_eq!(locator.refresh(ID, "save", None).await.unwrap(), second);

        assert_eq!(locator.invalidate("accessibility id:sa*").await, 1);
        assert!(locator.preload(ID, "save").await);
        locator.clear_cache().await;
        assert!(locator.cache().is_empty());
    }

    #[cfg(feature = "prefetch")]
    #[tokio::test]
    async fn test_hub_resolution_prefetches_related() {
        let driver = Arc::new(MockDriver::new());
        let email = driver.add(MockElement::new("XCUIElementTypeTextField"));
        let password = driver.add(MockElement::new("XCUIElementTypeSecureTextField"));
        driver.answer(ID, "email_field", vec![email.clone()]);
        driver.answer(LocatorStrategy::ClassName, "XCUIElementTypeTextField", vec![email]);
        driver.answer(LocatorStrategy::ClassName, "XCUIElementTypeSecureTextField", vec![password]);
        let locator = Locator::new(driver.clone());

        locator
            .find_element(ID, "email_field", Some(quick().with_prefetch_related(true)))
            .await
            .unwrap();

        let hub = CacheKey::new(ID, "email_field");
        for _ in 0..50 {
            if locator.cache().children_of(&hub).len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(locator.cache().children_of(&hub).len(), 2);
    }

    #[tokio::test]
    async fn test_disposed_locator_refuses_requests() {
        let driver = Arc::new(MockDriver::new());
        let locator = Locator::new(driver.clone());
        locator.dispose().await;

        assert!(matches!(
            locator.find_element(ID, "x", None).await,
            Err(LocatorError::Disposed)
        ));
        assert!(matches!(
            locator.find_elements(ID, "x", None).await,
            Err(LocatorError::Disposed)
        ));
        assert_eq!(driver.total_calls(), 0);
    }
}
