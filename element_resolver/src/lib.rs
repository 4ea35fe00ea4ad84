//! # Element Resolver
//!
//! Cached, ranked and self-healing element resolution for remote mobile UI
//! automation sessions.
//!
//! ## Features
//!
//! - **Cache first**: resolutions are cached with TTL, LRU pruning and
//!   identifier / category / parent-child indices
//! - **Cascading invalidation**: glob patterns drop an entry and everything
//!   cached beneath it
//! - **Ranking**: multiple candidates are scored on identifier, visibility,
//!   enablement and text match
//! - **Prediction**: identifier templates learned from labelled elements
//!   recover elements whose identifiers are missing
//! - **Remote tier**: an optional Redis-style store shares resolutions
//!   across processes and degrades silently when unreachable
//! - **Pressure aware**: injected pressure signals prune the cache on demand
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use element_resolver::{Locator, LocatorOptions, LocatorStrategy, WebDriverSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Arc::new(WebDriverSession::from_driver(driver));
//!     let locator = Locator::new(session);
//!
//!     let login = locator
//!         .find_element(
//!             LocatorStrategy::AccessibilityId,
//!             "login_button",
//!             Some(LocatorOptions::new().with_text("Login")),
//!         )
//!         .await?;
//!     println!("resolved {login}");
//!
//!     // Second lookup is served from the cache
//!     locator.find_element(LocatorStrategy::AccessibilityId, "login_button", None).await?;
//!
//!     locator.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Shared Cache Across Processes
//!
//! ```rust,ignore
//! use element_resolver::{
//!     CacheConfig, Locator, MemoryBackend, PressureNotifier, RemoteStoreAdapter,
//!     RemoteStoreConfig,
//! };
//!
//! let pressure = PressureNotifier::new();
//! let remote = RemoteStoreAdapter::with_pressure(
//!     Arc::new(MemoryBackend::new()),
//!     RemoteStoreConfig::from_env(),
//!     &pressure,
//! );
//! let locator = Locator::builder(session)
//!     .cache_config(CacheConfig::from_env())
//!     .remote(remote)
//!     .pressure(pressure.clone())
//!     .build();
//! ```
//!
//! ## Feature Flags
//!
//! - `prefetch` - Background prefetch of elements related to a resolved hub (default)
//! - `webdriver` - WebDriver / Appium driver via thirtyfour
//! - `full` - All features

#![warn(missing_docs)]

pub mod cache;
mod config;
mod driver;
mod error;
mod locator;
mod pattern;
mod pressure;
mod rank;
pub mod remote;

#[cfg(feature = "prefetch")]
mod prefetch;

#[cfg(feature = "webdriver")]
mod webdriver;

#[cfg(test)]
mod test_support;

pub use cache::{
    CacheEntry, CacheStats, CacheStatsSnapshot, ElementCache, ElementCacheBuilder,
    MaintenanceReport, Metadata,
};
pub use config::{
    CacheConfig, LocatorConfig, LocatorOptions, PrefetchConfig, PressureTiers, RemoteStoreConfig,
};
pub use driver::{read_identifier, AttributeReader, Driver};
pub use error::{
    DriverError, DriverResult, LocatorError, LocatorResult, RemoteError, RemoteResult,
};
pub use locator::{text_search_xpath, Locator, LocatorBuilder};
pub use pattern::PatternLearner;
pub use pressure::{PressureLevel, PressureNotifier};
pub use rank::{RankedCandidate, Ranker};
pub use remote::{MemoryBackend, RemoteBackend, RemoteRecord, RemoteStoreAdapter};

#[cfg(feature = "prefetch")]
pub use prefetch::PrefetchManager;

#[cfg(feature = "webdriver")]
pub use webdriver::{WebDriverSession, DEFAULT_MAX_REGISTERED};

// Re-export the shared types so callers need only one crate.
pub use element_resolver_types::{
    fuzzy_score, glob_match, CacheKey, ElementCategory, ElementRef, ElementSample, HubKind,
    IdentifierTemplate, LearnedTemplate, LocatorStrategy, PatternModel, Platform, Prediction,
    Transform,
};
