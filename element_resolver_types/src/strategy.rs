//! Locator strategies, element handles and cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between the strategy and selector halves of a cache key.
///
/// No strategy wire name contains it, so the first occurrence always
/// marks the boundary.
pub const KEY_SEPARATOR: char = ':';

/// Separates the strategy from the result index in indexed keys.
pub const INDEX_MARKER: char = '#';

/// A named method of addressing a UI element.
///
/// Wire names follow the Appium / W3C WebDriver `using` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    /// Accessibility identifier (the stable id on iOS, content-desc on Android).
    AccessibilityId,
    /// Platform element id (resource-id on Android).
    Id,
    /// Element name attribute.
    Name,
    /// XPath expression over the UI hierarchy.
    XPath,
    /// Element class / type name.
    ClassName,
    /// iOS NSPredicate string.
    Predicate,
    /// iOS class chain.
    ClassChain,
    /// CSS selector (webviews).
    Css,
}

impl LocatorStrategy {
    /// All strategies, in wire-name order.
    pub const ALL: [LocatorStrategy; 8] = [
        Self::AccessibilityId,
        Self::Id,
        Self::Name,
        Self::XPath,
        Self::ClassName,
        Self::Predicate,
        Self::ClassChain,
        Self::Css,
    ];

    /// The wire name sent to the automation driver.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessibilityId => "accessibility id",
            Self::Id => "id",
            Self::Name => "name",
            Self::XPath => "xpath",
            Self::ClassName => "class name",
            Self::Predicate => "-ios predicate string",
            Self::ClassChain => "-ios class chain",
            Self::Css => "css selector",
        }
    }

    /// Whether the selector is expected to be a stable identifier.
    pub fn is_identifier_like(&self) -> bool {
        matches!(self, Self::AccessibilityId | Self::Id | Self::Name)
    }
}

impl fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a wire name does not match any strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStrategy(pub String);

impl fmt::Display for UnknownStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown locator strategy: {}", self.0)
    }
}

impl std::error::Error for UnknownStrategy {}

impl FromStr for LocatorStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Opaque handle to a located element.
///
/// Wraps the driver-assigned element reference. The resolver stores and
/// returns it but never interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementRef(String);

impl ElementRef {
    /// Wrap a driver element id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The driver element id.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primary cache key: strategy plus selector, with an optional result index
/// for multi-element queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Strategy used to locate the element.
    pub strategy: LocatorStrategy,
    /// Selector passed with the strategy.
    pub selector: String,
    /// Position within a multi-element result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl CacheKey {
    /// Key for a single-element lookup.
    pub fn new(strategy: LocatorStrategy, selector: impl Into<String>) -> Self {
        Self {
            strategy,
            selector: selector.into(),
            index: None,
        }
    }

    /// Key for the `index`-th result of a multi-element lookup.
    pub fn indexed(strategy: LocatorStrategy, selector: impl Into<String>, index: usize) -> Self {
        Self {
            strategy,
            selector: selector.into(),
            index: Some(index),
        }
    }

    /// Parse a rendered key back into its parts.
    pub fn parse(raw: &str) -> Option<Self> {
        let (head, selector) = raw.split_once(KEY_SEPARATOR)?;
        match head.split_once(INDEX_MARKER) {
            Some((strategy, index)) => Some(Self::indexed(
                strategy.parse().ok()?,
                selector,
                index.parse().ok()?,
            )),
            None => Some(Self::new(head.parse().ok()?, selector)),
        }
    }
}

/// Renders as `strategy:selector`, or `strategy#index:selector` for indexed
/// keys. The index sits before the separator so no selector can forge it.
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strategy.as_str())?;
        if let Some(index) = self.index {
            write!(f, "{INDEX_MARKER}{index}")?;
        }
        write!(f, "{KEY_SEPARATOR}{}", self.selector)
    }
}
