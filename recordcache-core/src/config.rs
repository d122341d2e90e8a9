//! Configuration types
//!
//! Each struct has sensible development defaults, a `from_env()` constructor
//! reading `RECORDCACHE_*` variables, `with_*` builders and `validate()`.

use std::time::Duration;

use crate::{ConfigError, RecordError, RecordResult};

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn invalid(field: &str, value: impl std::fmt::Debug, reason: &str) -> RecordError {
    RecordError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{:?}", value),
        reason: reason.to_string(),
    })
}

// ============================================================================
// REPOSITORY CONFIGURATION
// ============================================================================

/// Cache-aside policy used by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// TTL for cached records.
    pub positive_ttl: Duration,
    /// TTL for the "confirmed absent" marker.
    pub negative_ttl: Duration,
    /// Upper bound for a single cache round trip. Elapsing counts as a miss.
    pub cache_timeout: Duration,
    /// Upper bound for a single store round trip.
    pub store_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            positive_ttl: Duration::from_secs(5 * 60),
            negative_ttl: Duration::from_secs(60),
            cache_timeout: Duration::from_millis(500),
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults.
    ///
    /// - `RECORDCACHE_POSITIVE_TTL_SECS` (default: 300)
    /// - `RECORDCACHE_NEGATIVE_TTL_SECS` (default: 60)
    /// - `RECORDCACHE_CACHE_TIMEOUT_MS` (default: 500)
    /// - `RECORDCACHE_STORE_TIMEOUT_MS` (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            positive_ttl: env_parse("RECORDCACHE_POSITIVE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.positive_ttl),
            negative_ttl: env_parse("RECORDCACHE_NEGATIVE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.negative_ttl),
            cache_timeout: env_parse("RECORDCACHE_CACHE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_timeout),
            store_timeout: env_parse("RECORDCACHE_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
        }
    }

    pub fn with_positive_ttl(mut self, ttl: Duration) -> Self {
        self.positive_ttl = ttl;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Validate the policy.
    ///
    /// The negative marker must be short-lived: positive, and never longer
    /// than the positive TTL.
    pub fn validate(&self) -> RecordResult<()> {
        if self.positive_ttl.is_zero() {
            return Err(invalid("positive_ttl", self.positive_ttl, "positive_ttl must be positive"));
        }
        if self.negative_ttl.is_zero() {
            return Err(invalid("negative_ttl", self.negative_ttl, "negative_ttl must be positive"));
        }
        if self.negative_ttl > self.positive_ttl {
            return Err(invalid(
                "negative_ttl",
                self.negative_ttl,
                "negative_ttl must not exceed positive_ttl",
            ));
        }
        if self.cache_timeout.is_zero() {
            return Err(invalid("cache_timeout", self.cache_timeout, "cache_timeout must be positive"));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid("store_timeout", self.store_timeout, "store_timeout must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// CACHE TIER CONFIGURATION
// ============================================================================

/// Connection settings for the networked cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTierConfig {
    /// Redis connection URL.
    pub url: String,
    /// Optional namespace prepended to every key (`<ns>:record:info:<id>`).
    pub namespace: String,
    /// Upper bound for a single command, including connection setup.
    pub command_timeout: Duration,
}

impl Default for CacheTierConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: String::new(),
            command_timeout: Duration::from_millis(500),
        }
    }
}

impl CacheTierConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// - `RECORDCACHE_REDIS_URL`
    /// - `RECORDCACHE_CACHE_NAMESPACE`
    /// - `RECORDCACHE_REDIS_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("RECORDCACHE_REDIS_URL").unwrap_or(defaults.url),
            namespace: std::env::var("RECORDCACHE_CACHE_NAMESPACE").unwrap_or_default(),
            command_timeout: env_parse("RECORDCACHE_REDIS_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn validate(&self) -> RecordResult<()> {
        if self.url.trim().is_empty() {
            return Err(RecordError::Config(ConfigError::MissingRequired {
                field: "url".to_string(),
            }));
        }
        if self.namespace.contains(char::is_whitespace) {
            return Err(invalid("namespace", &self.namespace, "namespace must not contain whitespace"));
        }
        if self.command_timeout.is_zero() {
            return Err(invalid(
                "command_timeout",
                self.command_timeout,
                "command_timeout must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// PostgreSQL connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection acquisition timeout
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "recordcache".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// Load from `RECORDCACHE_DB_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("RECORDCACHE_DB_HOST").unwrap_or(defaults.host),
            port: env_parse("RECORDCACHE_DB_PORT").unwrap_or(defaults.port),
            dbname: std::env::var("RECORDCACHE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("RECORDCACHE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("RECORDCACHE_DB_PASSWORD").unwrap_or_default(),
            max_size: env_parse("RECORDCACHE_DB_POOL_SIZE").unwrap_or(defaults.max_size),
            timeout: env_parse("RECORDCACHE_DB_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn validate(&self) -> RecordResult<()> {
        if self.host.is_empty() {
            return Err(RecordError::Config(ConfigError::MissingRequired {
                field: "host".to_string(),
            }));
        }
        if self.dbname.is_empty() {
            return Err(RecordError::Config(ConfigError::MissingRequired {
                field: "dbname".to_string(),
            }));
        }
        if self.max_size == 0 {
            return Err(invalid("max_size", self.max_size, "max_size must be greater than 0"));
        }
        Ok(())
    }
}
