//! Error types for element_resolver.
//!
//! Only [`LocatorError`] crosses the public boundary. Driver and remote-tier
//! failures are absorbed by the locator and the cache respectively.

use element_resolver_types::LocatorStrategy;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the locator.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// No matching element after exhausting cache, direct lookup, fallbacks and retries.
    #[error("element not found: {strategy}:{selector} after {attempts} attempt(s)")]
    NotFound {
        /// Strategy requested.
        strategy: LocatorStrategy,
        /// Selector requested.
        selector: String,
        /// Attempts made before giving up.
        attempts: usize,
    },
    /// The caller's deadline ran out before an element was found.
    #[error("element not found: {strategy}:{selector} (timed out after {elapsed:?})")]
    Timeout {
        /// Strategy requested.
        strategy: LocatorStrategy,
        /// Selector requested.
        selector: String,
        /// Time spent before giving up.
        elapsed: Duration,
    },
    /// The locator has been disposed.
    #[error("locator has been disposed")]
    Disposed,
}

impl LocatorError {
    /// Whether this error means "no such element" (including deadline exhaustion).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Timeout { .. })
    }
}

/// Result type for locator operations.
pub type LocatorResult<T> = Result<T, LocatorError>;

/// Errors reported by a driver capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The query matched nothing.
    #[error("no such element")]
    NoSuchElement,
    /// The element reference is no longer attached to the UI tree.
    #[error("stale element reference")]
    StaleReference,
    /// The strategy or command is not supported by this driver.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// Session or transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported by a remote store backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The store could not be reached.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    /// The operation exceeded its time budget.
    #[error("remote store operation timed out")]
    Timeout,
    /// The store does not implement the command.
    #[error("remote store command unsupported: {0}")]
    Unsupported(&'static str),
    /// A record could not be encoded or decoded.
    #[error("remote record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;
