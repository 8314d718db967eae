use std::time::Duration;

use crate::cache::CacheManager;
use crate::error::AppError;
use crate::rate_limit::RateLimiter;

/// Service-wide limits, read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub cache_ttl: Duration,
    /// `None` means unbounded.
    pub cache_max_entries: Option<usize>,
    pub batch_concurrency: usize,
    pub batch_max_targets: usize,
    pub request_timeout: Duration,
    /// How long an anti-bot block on a target steers auto-selection.
    pub anti_bot_memory: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: 60,
            rate_limit_window: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: Some(1000),
            batch_concurrency: 5,
            batch_max_targets: 100,
            request_timeout: Duration::from_secs(60),
            anti_bot_memory: Duration::from_secs(3600),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from environment variables.
    ///
    /// Every variable is optional and falls back to [`ServiceConfig::default`]:
    ///
    /// - `QUARRY_RATE_LIMIT_MAX` (60)
    /// - `QUARRY_RATE_LIMIT_WINDOW_SECS` (60)
    /// - `QUARRY_CACHE_TTL_SECS` (3600)
    /// - `QUARRY_CACHE_MAX_ENTRIES` (1000, `0` disables the bound)
    /// - `QUARRY_BATCH_CONCURRENCY` (5)
    /// - `QUARRY_BATCH_MAX_TARGETS` (100)
    /// - `QUARRY_REQUEST_TIMEOUT_SECS` (60)
    /// - `QUARRY_ANTI_BOT_MEMORY_SECS` (3600)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] but reads through `lookup`.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let rate_limit_max = positive(&lookup, "QUARRY_RATE_LIMIT_MAX", defaults.rate_limit_max)?;
        let rate_limit_window = seconds(
            &lookup,
            "QUARRY_RATE_LIMIT_WINDOW_SECS",
            defaults.rate_limit_window,
        )?;
        let cache_ttl = seconds(&lookup, "QUARRY_CACHE_TTL_SECS", defaults.cache_ttl)?;
        let cache_max_entries = match lookup("QUARRY_CACHE_MAX_ENTRIES") {
            None => defaults.cache_max_entries,
            Some(raw) => {
                let parsed: usize = parse(&raw, "QUARRY_CACHE_MAX_ENTRIES")?;
                (parsed > 0).then_some(parsed)
            }
        };
        let batch_concurrency = positive(
            &lookup,
            "QUARRY_BATCH_CONCURRENCY",
            defaults.batch_concurrency,
        )?;
        let batch_max_targets = positive(
            &lookup,
            "QUARRY_BATCH_MAX_TARGETS",
            defaults.batch_max_targets,
        )?;
        let request_timeout = seconds(
            &lookup,
            "QUARRY_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout,
        )?;
        let anti_bot_memory = seconds(
            &lookup,
            "QUARRY_ANTI_BOT_MEMORY_SECS",
            defaults.anti_bot_memory,
        )?;

        Ok(Self {
            rate_limit_max,
            rate_limit_window,
            cache_ttl,
            cache_max_entries,
            batch_concurrency,
            batch_max_targets,
            request_timeout,
            anti_bot_memory,
        })
    }

    pub fn rate_limiter(&self) -> Result<RateLimiter, AppError> {
        RateLimiter::new(self.rate_limit_max, self.rate_limit_window)
    }

    pub fn cache<V: Clone>(&self) -> CacheManager<V> {
        CacheManager::new(self.cache_ttl, self.cache_max_entries)
    }
}

fn parse<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T, AppError> {
    raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a non-negative integer"
        ))
    })
}

fn positive<L, T>(lookup: &L, key: &str, default: T) -> Result<T, AppError>
where
    L: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialEq + Default,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let parsed: T = parse(&raw, key)?;
            if parsed == T::default() {
                return Err(AppError::ConfigError(format!("{key} must be at least 1")));
            }
            Ok(parsed)
        }
    }
}

fn seconds<L>(lookup: &L, key: &str, default: Duration) -> Result<Duration, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    let secs = positive(lookup, key, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, ServiceConfig::default());
        assert_eq!(cfg.rate_limit_max, 60);
        assert_eq!(cfg.cache_max_entries, Some(1000));
    }

    #[test]
    fn reads_overrides() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[
            ("QUARRY_RATE_LIMIT_MAX", "2"),
            ("QUARRY_RATE_LIMIT_WINDOW_SECS", "1"),
            ("QUARRY_CACHE_MAX_ENTRIES", "0"),
            ("QUARRY_BATCH_CONCURRENCY", " 8 "),
        ]))
        .unwrap();
        assert_eq!(cfg.rate_limit_max, 2);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(1));
        assert_eq!(cfg.cache_max_entries, None);
        assert_eq!(cfg.batch_concurrency, 8);
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn rejects_garbage_and_zero() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("QUARRY_RATE_LIMIT_MAX", "lots")]))
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));

        let err = ServiceConfig::from_lookup(lookup_from(&[("QUARRY_BATCH_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("QUARRY_BATCH_CONCURRENCY"));

        assert!(
            ServiceConfig::from_lookup(lookup_from(&[("QUARRY_CACHE_TTL_SECS", "-5")])).is_err()
        );
    }

    #[test]
    fn builds_components() {
        let cfg = ServiceConfig::default();
        let limiter = cfg.rate_limiter().unwrap();
        assert_eq!(limiter.max_per_window(), 60);
        let cache: CacheManager<String> = cfg.cache();
        assert!(cache.is_empty());
    }
}
