use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub tracking: TrackingConfig,
    pub cookie: CookieConfig,
    pub cache: CacheConfig,
    /// Shared secret for backfill writes. Backfill is rejected when unset.
    pub backfill_secret: Option<String>,
    /// Where `/` redirects to
    pub home_url: Option<String>,
    /// Overrides the embedded tracking pixel
    pub pixel_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// What `EventQueue::submit` does when the queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueFullPolicy {
    /// Wait for space. The pixel response is delayed but no event is lost.
    #[default]
    Block,
    /// Drop the event and count it.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub queue_full_policy: QueueFullPolicy,
    pub store_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 0 disables the read cache
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl TrackingConfig {
    /// Never zero: a zero timeout would fail every store call.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }

    fn default_queue_capacity() -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores * 4
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_queue_capacity(),
            workers: 1,
            queue_full_policy: QueueFullPolicy::Block,
            store_timeout_ms: 2000,
        }
    }
}

impl CookieConfig {
    /// 30 days. The historical value multiplied by an extra 60 (about five years).
    pub const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 30;

    /// 100 years
    pub const MAX_AGE_LIMIT_SECS: u64 = 60 * 60 * 24 * 365 * 100;

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("COOKIE_NAME must not be empty");
        }
        if self.max_age_secs > Self::MAX_AGE_LIMIT_SECS {
            anyhow::bail!(
                "COOKIE_MAX_AGE_SECS is {} but must be at most {}",
                self.max_age_secs,
                Self::MAX_AGE_LIMIT_SECS
            );
        }
        Ok(())
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "uid".to_string(),
            max_age_secs: Self::DEFAULT_MAX_AGE_SECS,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 0,
            max_entries: 10_000,
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {name}: '{raw}'")),
        _ => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        // DATABASE_PROVIDER names the variable that carries the URL (e.g. a
        // hosting add-on's own variable); DATABASE_URL is the fallback.
        let database_url = match env_opt("DATABASE_PROVIDER") {
            Some(provider) => std::env::var(&provider).with_context(|| {
                format!("DATABASE_PROVIDER is '{provider}' but {provider} is not set")
            })?,
            None => std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./beacon.db?mode=rwc".to_string()),
        };

        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_parse("PORT", 8080u16)?;

        let defaults = TrackingConfig::default();
        let queue_full_policy = match std::env::var("QUEUE_FULL_POLICY")
            .unwrap_or_else(|_| "block".to_string())
            .to_lowercase()
            .as_str()
        {
            "block" => QueueFullPolicy::Block,
            "drop" => QueueFullPolicy::Drop,
            other => {
                tracing::warn!(
                    "Unknown QUEUE_FULL_POLICY '{other}', falling back to 'block'. Supported values: block, drop"
                );
                QueueFullPolicy::Block
            }
        };

        let tracking = TrackingConfig {
            queue_capacity: env_parse("QUEUE_CAPACITY", defaults.queue_capacity)?.max(1),
            workers: env_parse("INGEST_WORKERS", defaults.workers)?.max(1),
            queue_full_policy,
            store_timeout_ms: env_parse("STORE_TIMEOUT_MS", defaults.store_timeout_ms)?.max(1),
        };

        let cookie = CookieConfig {
            name: env_opt("COOKIE_NAME").unwrap_or_else(|| "uid".to_string()),
            max_age_secs: env_parse("COOKIE_MAX_AGE_SECS", CookieConfig::DEFAULT_MAX_AGE_SECS)?,
        };
        cookie.validate().context("invalid cookie configuration")?;

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            ttl_secs: env_parse("READ_CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
            max_entries: env_parse("READ_CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
        };

        let backfill_secret = env_opt("BACKFILL_SECRET");
        if backfill_secret.is_none() {
            tracing::warn!("BACKFILL_SECRET is not set, backfill writes are disabled");
        }

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            tracking,
            cookie,
            cache,
            backfill_secret,
            home_url: env_opt("HOME_URL"),
            pixel_path: env_opt("PIXEL_PATH"),
        })
    }
}
