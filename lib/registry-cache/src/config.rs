//! Environment configuration for the cache daemon

use crate::{CacheError, Result};
use kube_runtime::watcher;
use std::time::Duration;

const NAMESPACE_VAR: &str = "NSE_CACHE_NAMESPACE";
const LABEL_SELECTOR_VAR: &str = "NSE_CACHE_LABEL_SELECTOR";
const FIELD_SELECTOR_VAR: &str = "NSE_CACHE_FIELD_SELECTOR";
const STATS_INTERVAL_VAR: &str = "NSE_CACHE_STATS_INTERVAL_SECS";

const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;

/// Daemon configuration
#[derive(Clone, Debug, PartialEq)]
pub struct DaemonConfig {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Label selector applied to the watch
    pub label_selector: Option<String>,
    /// Field selector applied to the watch
    pub field_selector: Option<String>,
    /// Interval between cache statistics log lines
    pub stats_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            label_selector: None,
            field_selector: None,
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let stats_interval = match non_empty(STATS_INTERVAL_VAR) {
            Some(value) => {
                let secs: u64 = value.trim().parse().map_err(|_| {
                    CacheError::InvalidConfiguration(format!(
                        "{} must be a whole number of seconds, got {:?}",
                        STATS_INTERVAL_VAR, value
                    ))
                })?;
                if secs == 0 {
                    return Err(CacheError::InvalidConfiguration(format!(
                        "{} must be greater than zero",
                        STATS_INTERVAL_VAR
                    )));
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
        };

        Ok(Self {
            namespace: non_empty(NAMESPACE_VAR),
            label_selector: non_empty(LABEL_SELECTOR_VAR),
            field_selector: non_empty(FIELD_SELECTOR_VAR),
            stats_interval,
        })
    }

    /// Watcher configuration carrying the configured selectors
    pub fn watcher_config(&self) -> watcher::Config {
        let mut config = watcher::Config::default();
        if let Some(labels) = &self.label_selector {
            config = config.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            config = config.fields(fields);
        }
        config
    }
}
