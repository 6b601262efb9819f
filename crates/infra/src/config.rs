//! Runtime configuration.
//!
//! Defaults are usable as-is; `from_env` overrides them from `STOCKLINE_*`
//! variables. Values that fail to parse keep their default and log a warning.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const ENV_ORDER_PREFIX: &str = "STOCKLINE_ORDER_PREFIX";
pub const ENV_HISTORY_PAGE_SIZE: &str = "STOCKLINE_HISTORY_PAGE_SIZE";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "STOCKLINE_MAX_CONFLICT_RETRIES";
pub const ENV_ORDER_NUMBER_ATTEMPTS: &str = "STOCKLINE_ORDER_NUMBER_ATTEMPTS";
pub const ENV_DEFAULT_LOW_STOCK_THRESHOLD: &str = "STOCKLINE_DEFAULT_LOW_STOCK_THRESHOLD";
pub const ENV_LOCK_TIMEOUT_MS: &str = "STOCKLINE_LOCK_TIMEOUT_MS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Leading segment of generated order numbers.
    pub order_prefix: String,
    /// Movements per page of inventory history.
    pub history_page_size: u32,
    /// Extra attempts for units of work that fail with a retryable conflict.
    pub max_conflict_retries: u32,
    /// Candidates tried before order creation gives up on a unique number.
    pub order_number_attempts: u32,
    /// Threshold for products created without one.
    pub default_low_stock_threshold: i64,
    /// Upper bound on row-lock waits in the Postgres store.
    pub lock_timeout: Duration,
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order_prefix: "ORD".to_string(),
            history_page_size: 15,
            max_conflict_retries: 3,
            order_number_attempts: 16,
            default_low_stock_threshold: 10,
            lock_timeout: Duration::from_millis(2000),
            database_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let order_prefix = match lookup(ENV_ORDER_PREFIX) {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            _ => defaults.order_prefix,
        };

        Self {
            order_prefix,
            history_page_size: parsed(&lookup, ENV_HISTORY_PAGE_SIZE, defaults.history_page_size)
                .max(1),
            max_conflict_retries: parsed(
                &lookup,
                ENV_MAX_CONFLICT_RETRIES,
                defaults.max_conflict_retries,
            ),
            order_number_attempts: parsed(
                &lookup,
                ENV_ORDER_NUMBER_ATTEMPTS,
                defaults.order_number_attempts,
            )
            .max(1),
            default_low_stock_threshold: parsed(
                &lookup,
                ENV_DEFAULT_LOW_STOCK_THRESHOLD,
                defaults.default_low_stock_threshold,
            )
            .max(0),
            lock_timeout: Duration::from_millis(parsed(
                &lookup,
                ENV_LOCK_TIMEOUT_MS,
                defaults.lock_timeout.as_millis() as u64,
            )),
            database_url: lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()),
        }
    }

    pub fn with_order_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.order_prefix = prefix.into();
        self
    }

    pub fn with_history_page_size(mut self, size: u32) -> Self {
        self.history_page_size = size.max(1);
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_order_number_attempts(mut self, attempts: u32) -> Self {
        self.order_number_attempts = attempts.max(1);
        self
    }

    pub fn with_default_low_stock_threshold(mut self, threshold: i64) -> Self {
        self.default_low_stock_threshold = threshold.max(0);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + core::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, default = %default, "ignoring unparseable config value");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let cfg = Config::from_lookup(lookup(&[
            (ENV_ORDER_PREFIX, "SO"),
            (ENV_HISTORY_PAGE_SIZE, "50"),
            (ENV_MAX_CONFLICT_RETRIES, "7"),
            (ENV_LOCK_TIMEOUT_MS, "250"),
            (ENV_DATABASE_URL, "postgres://localhost/stockline"),
        ]));
        assert_eq!(cfg.order_prefix, "SO");
        assert_eq!(cfg.history_page_size, 50);
        assert_eq!(cfg.max_conflict_retries, 7);
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/stockline"));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = Config::from_lookup(lookup(&[
            (ENV_HISTORY_PAGE_SIZE, "lots"),
            (ENV_ORDER_NUMBER_ATTEMPTS, "0"),
            (ENV_ORDER_PREFIX, "  "),
        ]));
        assert_eq!(cfg.history_page_size, 15);
        assert_eq!(cfg.order_number_attempts, 1);
        assert_eq!(cfg.order_prefix, "ORD");
    }

    #[test]
    fn builders_clamp_nonsense() {
        let cfg = Config::default()
            .with_history_page_size(0)
            .with_default_low_stock_threshold(-5);
        assert_eq!(cfg.history_page_size, 1);
        assert_eq!(cfg.default_low_stock_threshold, 0);
    }
}
