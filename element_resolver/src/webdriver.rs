//! WebDriver / Appium driver backed by thirtyfour.
//!
//! Located elements are kept in a registry keyed by their WebDriver element
//! id, so an [`ElementRef`] handed out by the resolver maps back to a live
//! `WebElement`. Call [`WebDriverSession::clear_registry`] after navigating
//! to a new screen; the registry is also bounded and starts over once it
//! holds `max_registered` elements.

use crate::driver::{AttributeReader, Driver};
use crate::error::{DriverError, DriverResult};
use async_trait::async_trait;
use dashmap::DashMap;
use element_resolver_types::{xpath_literal, ElementRef, LocatorStrategy};
use std::sync::Arc;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;

fn driver_error(e: WebDriverError) -> DriverError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("no such element") || lower.contains("nosuchelement") {
        DriverError::NoSuchElement
    } else if lower.contains("stale element") {
        DriverError::StaleReference
    } else {
        DriverError::Transport(message)
    }
}

/// Registry bound used by [`WebDriverSession::new`].
pub const DEFAULT_MAX_REGISTERED: usize = 4096;

/// Element handles by id, cleared wholesale once full.
struct Registry<T> {
    entries: DashMap<String, T>,
    max: usize,
}

impl<T: Clone> Registry<T> {
    fn new(max: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max: max.max(1),
        }
    }

    fn insert(&self, id: String, value: T) {
        if self.entries.len() >= self.max && !self.entries.contains_key(&id) {
            log::debug!("element registry full ({}), starting over", self.max);
            self.entries.clear();
        }
        self.entries.insert(id, value);
    }

    fn get(&self, id: &str) -> Option<T> {
        self.entries.get(id).map(|found| found.value().clone())
    }
}

/// Driver over a thirtyfour WebDriver session.
///
/// Handed-out element refs stay valid until the registry is cleared. Clear it
/// (and the locator's cache) after navigation so handles from the previous
/// screen are released.
pub struct WebDriverSession {
    driver: Arc<WebDriver>,
    elements: Registry<WebElement>,
}

impl WebDriverSession {
    /// Wrap an existing session.
    pub fn new(driver: Arc<WebDriver>) -> Self {
        Self::with_max_registered(driver, DEFAULT_MAX_REGISTERED)
    }

    /// Wrap an existing session with a custom registry bound.
    pub fn with_max_registered(driver: Arc<WebDriver>, max_registered: usize) -> Self {
        Self {
            driver,
            elements: Registry::new(max_registered),
        }
    }

    /// Wrap a session (takes ownership).
    pub fn from_driver(driver: WebDriver) -> Self {
        Self::new(Arc::new(driver))
    }

    /// The WebDriver session.
    pub fn driver(&self) -> &Arc<WebDriver> {
        &self.driver
    }

    /// Number of elements held in the registry.
    pub fn registered(&self) -> usize {
        self.elements.entries.len()
    }

    /// Drop an element from the registry.
    pub fn forget(&self, element: &ElementRef) {
        self.elements.entries.remove(element.id());
    }

    /// Drop every registered element. Call after navigating away.
    pub fn clear_registry(&self) {
        self.elements.entries.clear();
    }

    fn register(&self, element: WebElement) -> ElementRef {
        let id = element.element_id().to_string();
        self.elements.insert(id.clone(), element);
        ElementRef::new(id)
    }

    fn element(&self, element: &ElementRef) -> DriverResult<WebElement> {
        self.elements
            .get(element.id())
            .ok_or(DriverError::StaleReference)
    }

    fn by(strategy: LocatorStrategy, selector: &str) -> DriverResult<By> {
        Ok(match strategy {
            LocatorStrategy::Id => By::Id(selector),
            LocatorStrategy::Name => By::Name(selector),
            LocatorStrategy::XPath => By::XPath(selector),
            LocatorStrategy::ClassName => By::ClassName(selector),
            LocatorStrategy::Css => By::Css(selector),
            LocatorStrategy::AccessibilityId => {
                let literal = xpath_literal(selector);
                By::XPath(format!(
                    "//*[@accessibilityIdentifier={literal} or @name={literal} or @content-desc={literal}]"
                ))
            }
            LocatorStrategy::Predicate => return Err(DriverError::Unsupported("-ios predicate string")),
            LocatorStrategy::ClassChain => return Err(DriverError::Unsupported("-ios class chain")),
        })
    }
}

#[async_trait]
impl AttributeReader for WebDriverSession {
    async fn read_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> DriverResult<Option<String>> {
        self.element(element)?.attr(name).await.map_err(driver_error)
    }

    async fn read_class_name(&self, element: &ElementRef) -> DriverResult<String> {
        self.element(element)?.tag_name().await.map_err(driver_error)
    }
}

#[async_trait]
impl Driver for WebDriverSession {
    async fn find_one(&self, strategy: LocatorStrategy, selector: &str) -> DriverResult<ElementRef> {
        let by = Self::by(strategy, selector)?;
        let found = self.driver.find(by).await.map_err(driver_error)?;
        Ok(self.register(found))
    }

    async fn find_all(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> DriverResult<Vec<ElementRef>> {
        let by = Self::by(strategy, selector)?;
        let found = self.driver.find_all(by).await.map_err(driver_error)?;
        Ok(found.into_iter().map(|element| self.register(element)).collect())
    }

    async fn is_visible(&self, element: &ElementRef) -> DriverResult<bool> {
        self.element(element)?.is_displayed().await.map_err(driver_error)
    }

    async fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool> {
        self.element(element)?.is_enabled().await.map_err(driver_error)
    }

    async fn read_text(&self, element: &ElementRef) -> DriverResult<String> {
        self.element(element)?.text().await.map_err(driver_error)
    }
}
