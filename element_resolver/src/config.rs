//! Configuration types for element_resolver.

use element_resolver_types::Platform;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Read and parse an environment variable, ignoring (and logging) bad values.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring unparseable {name}={raw:?}");
            None
        }
    }
}

/// Share of entries pruned per pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureTiers {
    /// Fraction pruned on a moderate pressure signal.
    pub moderate: f64,
    /// Fraction pruned on a critical pressure signal.
    pub critical: f64,
}

impl Default for PressureTiers {
    fn default() -> Self {
        Self {
            moderate: 0.25,
            critical: 0.5,
        }
    }
}

/// Element cache policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// An entry not accessed for this long is stale.
    pub ttl: Duration,
    /// Soft cap; exceeding it triggers pruning rather than rejecting inserts.
    pub max_entries: usize,
    /// Cadence of the background maintenance task.
    pub prune_interval: Duration,
    /// Fraction pruned when no explicit percentage is given.
    pub prune_percentage: f64,
    /// Fractions pruned on pressure signals.
    pub pressure_tiers: PressureTiers,
    /// Pruning never goes below this many entries. TTL and invalidation ignore it.
    pub min_resident_entries: usize,
    /// Cross-check the remote tier during maintenance.
    pub remote_sync_on_maintenance: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
            prune_interval: Duration::from_secs(60),
            prune_percentage: 0.2,
            pressure_tiers: PressureTiers::default(),
            min_resident_entries: 0,
            remote_sync_on_maintenance: false,
        }
    }
}

impl CacheConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ELEMENT_CACHE_TTL_SECS`, `ELEMENT_CACHE_MAX_ENTRIES`
    /// and `ELEMENT_CACHE_PRUNE_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("ELEMENT_CACHE_TTL_SECS") {
            config.ttl = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<usize>("ELEMENT_CACHE_MAX_ENTRIES") {
            config.max_entries = max;
        }
        if let Some(secs) = env_parse::<u64>("ELEMENT_CACHE_PRUNE_INTERVAL_SECS") {
            config.prune_interval = Duration::from_secs(secs.max(1));
        }
        config
    }

    /// Set the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the soft entry cap.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the maintenance cadence.
    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    /// Set the default prune fraction.
    pub fn with_prune_percentage(mut self, percentage: f64) -> Self {
        self.prune_percentage = percentage.clamp(0.0, 1.0);
        self
    }

    /// Set the pressure prune fractions.
    pub fn with_pressure_tiers(mut self, moderate: f64, critical: f64) -> Self {
        self.pressure_tiers = PressureTiers {
            moderate: moderate.clamp(0.0, 1.0),
            critical: critical.clamp(0.0, 1.0),
        };
        self
    }

    /// Set the resident floor.
    pub fn with_min_resident_entries(mut self, floor: usize) -> Self {
        self.min_resident_entries = floor;
        self
    }

    /// Enable or disable the remote cross-check during maintenance.
    pub fn with_remote_sync(mut self, enabled: bool) -> Self {
        self.remote_sync_on_maintenance = enabled;
        self
    }
}

/// Remote (distributed) tier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteStoreConfig {
    /// Prefix for every remote key.
    pub namespace: String,
    /// Expiry applied to mirrored records.
    pub ttl_secs: u64,
    /// Budget for any single remote operation.
    pub op_timeout: Duration,
    /// Consecutive connect failures before the tier is disabled.
    pub max_connect_attempts: u32,
    /// Ceiling for the reconnect backoff.
    pub max_backoff: Duration,
    /// Delete the namespace when the adapter is disposed.
    pub flush_on_dispose: bool,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            namespace: "element_cache".to_string(),
            ttl_secs: 3600,
            op_timeout: Duration::from_millis(250),
            max_connect_attempts: 5,
            max_backoff: Duration::from_secs(60),
            flush_on_dispose: false,
        }
    }
}

impl RemoteStoreConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ELEMENT_CACHE_REMOTE_NAMESPACE` and
    /// `ELEMENT_CACHE_REMOTE_TTL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(namespace) = std::env::var("ELEMENT_CACHE_REMOTE_NAMESPACE") {
            if !namespace.trim().is_empty() {
                config.namespace = namespace.trim().to_string();
            }
        }
        if let Some(secs) = env_parse::<u64>("ELEMENT_CACHE_REMOTE_TTL_SECS") {
            config.ttl_secs = secs;
        }
        config
    }

    /// Set the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the record expiry.
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Set the per-operation budget.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Set the connect attempt limit.
    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts.max(1);
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Flush the namespace on dispose.
    pub fn with_flush_on_dispose(mut self, flush: bool) -> Self {
        self.flush_on_dispose = flush;
        self
    }
}

/// Per-request resolution options. Ranking and prediction default on, fuzzy off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorOptions {
    /// Overall deadline for the request.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: usize,
    /// Delay between attempts.
    pub retry_interval: Duration,
    /// Text the element should show; enables the text fallback.
    pub text_criteria: Option<String>,
    /// Use fuzzy text scoring.
    pub fuzzy: bool,
    /// Rank multiple candidates.
    pub rank: bool,
    /// Use prediction-assisted fallback.
    pub predict: bool,
    /// Prefetch related elements after resolving a hub element.
    pub prefetch_related: bool,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 3,
            retry_interval: Duration::from_millis(500),
            text_criteria: None,
            fuzzy: false,
            rank: true,
            predict: true,
            prefetch_related: false,
        }
    }
}

impl LocatorOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay between attempts.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the text criteria.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_criteria = Some(text.into());
        self
    }

    /// Enable or disable fuzzy text scoring.
    pub fn with_fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    /// Enable or disable ranking.
    pub fn with_ranking(mut self, rank: bool) -> Self {
        self.rank = rank;
        self
    }

    /// Enable or disable prediction fallback.
    pub fn with_prediction(mut self, predict: bool) -> Self {
        self.predict = predict;
        self
    }

    /// Enable or disable related-element prefetch.
    pub fn with_prefetch_related(mut self, prefetch: bool) -> Self {
        self.prefetch_related = prefetch;
        self
    }
}

/// Related-element prefetch limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Concurrent prefetch tasks.
    pub max_concurrent: usize,
    /// Related elements cached per category query.
    pub max_related: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_related: 10,
        }
    }
}

/// Locator settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Platform whose class names are used for category queries.
    pub platform: Platform,
    /// Prefetch limits.
    pub prefetch: PrefetchConfig,
    /// Options used by `find_element` / `find_elements` callers that pass `None`.
    pub default_options: LocatorOptions,
}

impl LocatorConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the prefetch limits.
    pub fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Set the default request options.
    pub fn with_default_options(mut self, options: LocatorOptions) -> Self {
        self.default_options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LocatorOptions::default();
        assert!(options.rank);
        assert!(options.predict);
        assert!(!options.fuzzy);
        assert!(!options.prefetch_related);
        assert_eq!(options.retries, 3);

        let cache = CacheConfig::default();
        assert_eq!(cache.ttl, Duration::from_secs(300));
        assert_eq!(cache.min_resident_entries, 0);
    }

    #[test]
    fn test_builders_clamp() {
        let cache = CacheConfig::new()
            .with_prune_percentage(1.5)
            .with_pressure_tiers(-1.0, 0.75);
        assert_eq!(cache.prune_percentage, 1.0);
        assert_eq!(cache.pressure_tiers.moderate, 0.0);
        assert_eq!(cache.pressure_tiers.critical, 0.75);

        let remote = RemoteStoreConfig::new().with_max_connect_attempts(0);
        assert_eq!(remote.max_connect_attempts, 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: LocatorOptions =
            serde_json::from_str(r#"{"retries": 1, "fuzzy": true}"#).unwrap();
        assert_eq!(options.retries, 1);
        assert!(options.fuzzy);
        assert!(options.rank);
        assert_eq!(options.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("ELEMENT_CACHE_MAX_ENTRIES", "42");
        std::env::set_var("ELEMENT_CACHE_TTL_SECS", "not-a-number");
        let config = CacheConfig::from_env();
        assert_eq!(config.max_entries, 42);
        assert_eq!(config.ttl, Duration::from_secs(300));
        std::env::remove_var("ELEMENT_CACHE_MAX_ENTRIES");
        std::env::remove_var("ELEMENT_CACHE_TTL_SECS");
    }
}
