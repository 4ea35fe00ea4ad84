//! In-memory driver for unit tests.

use crate::driver::{AttributeReader, Driver};
use crate::error::{DriverError, DriverResult};
use async_trait::async_trait;
use dashmap::DashMap;
use element_resolver_types::{ElementRef, LocatorStrategy};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub(crate) struct MockElement {
    class_name: String,
    attributes: BTreeMap<String, String>,
    failing: HashSet<String>,
    visible: bool,
    enabled: bool,
    text: String,
    broken: bool,
}

impl MockElement {
    pub(crate) fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            attributes: BTreeMap::new(),
            failing: HashSet::new(),
            visible: true,
            enabled: true,
            text: String::new(),
            broken: false,
        }
    }

    pub(crate) fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub(crate) fn failing_attr(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub(crate) fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub(crate) fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub(crate) fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Every attribute read on this element fails.
    pub(crate) fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockDriver {
    elements: DashMap<String, MockElement>,
    queries: DashMap<(LocatorStrategy, String), Vec<ElementRef>>,
    next_id: AtomicUsize,
    find_one_calls: AtomicUsize,
    find_all_calls: AtomicUsize,
    offline: AtomicBool,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, element: MockElement) -> ElementRef {
        let id = format!("el-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.elements.insert(id.clone(), element);
        ElementRef::new(id)
    }

    pub(crate) fn answer(&self, strategy: LocatorStrategy, selector: &str, found: Vec<ElementRef>) {
        self.queries.insert((strategy, selector.to_string()), found);
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub(crate) fn find_one_calls(&self) -> usize {
        self.find_one_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn find_all_calls(&self) -> usize {
        self.find_all_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.find_one_calls() + self.find_all_calls()
    }

    fn element(&self, element: &ElementRef) -> DriverResult<MockElement> {
        let found = self
            .elements
            .get(element.id())
            .map(|e| e.value().clone())
            .ok_or(DriverError::StaleReference)?;
        if found.broken {
            return Err(DriverError::Transport("read failed".into()));
        }
        Ok(found)
    }

    fn lookup(&self, strategy: LocatorStrategy, selector: &str) -> DriverResult<Vec<ElementRef>> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(DriverError::Transport("session offline".into()));
        }
        Ok(self
            .queries
            .get(&(strategy, selector.to_string()))
            .map(|found| found.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AttributeReader for MockDriver {
    async fn read_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> DriverResult<Option<String>> {
        let found = self.element(element)?;
        if found.failing.contains(name) {
            return Err(DriverError::Transport(format!("cannot read {name}")));
        }
        Ok(found.attributes.get(name).cloned())
    }

    async fn read_class_name(&self, element: &ElementRef) -> DriverResult<String> {
        Ok(self.element(element)?.class_name)
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn find_one(&self, strategy: LocatorStrategy, selector: &str) -> DriverResult<ElementRef> {
        self.find_one_calls.fetch_add(1, Ordering::Relaxed);
        self.lookup(strategy, selector)?
            .into_iter()
            .next()
            .ok_or(DriverError::NoSuchElement)
    }

    async fn find_all(
        &self,
        strategy: LocatorStrategy,
        selector: &str,
    ) -> DriverResult<Vec<ElementRef>> {
        self.find_all_calls.fetch_add(1, Ordering::Relaxed);
        self.lookup(strategy, selector)
    }

    async fn is_visible(&self, element: &ElementRef) -> DriverResult<bool> {
        Ok(self.element(element)?.visible)
    }

    async fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool> {
        Ok(self.element(element)?.enabled)
    }

    async fn read_text(&self, element: &ElementRef) -> DriverResult<String> {
        Ok(self.element(element)?.text)
    }
}
