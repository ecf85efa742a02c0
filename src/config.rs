//! Process-wide configuration (SPEC_FULL.md §3).
//!
//! The lock journal path and the access-control mixin/principal names are
//! process-wide in the original design; this crate keeps them as fields on
//! [`Config`], injected at [`crate::Repository::new`] construction rather
//! than as global mutable state (spec.md §9 "Global mutable state").

use std::path::PathBuf;
use std::time::Duration;

/// Tunables recognized by the lock registry and the policy provider.
#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
#[derive(Clone, Debug)]
pub struct Config {
    /// If set, [`crate::Repository::init_workspace`] does not install the
    /// default root policy (spec.md §6 `omitDefaultPermissions`).
    pub omit_default_permissions: bool,
    /// Bound on the entry collector's LRU cache (spec.md §6
    /// `cachingEntryCollector.maxSize`, default 5000).
    pub entry_collector_cache_size: usize,
    /// Bound on each compiled-permissions instance's read cache (spec.md
    /// §6 `readCache.maxSize`, default 5000).
    pub read_cache_size: usize,
    /// How often the lock timeout handler runs (spec.md §4.2, default 1s).
    pub lock_timeout_poll_interval: Duration,
    /// Where the lock journal is persisted.
    pub journal_path: PathBuf,
    /// The principal granted `ALL` on the default root policy.
    pub administrators_principal: String,
    /// The principal granted `READ` on the default root policy.
    pub everyone_principal: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            omit_default_permissions: false,
            entry_collector_cache_size: 5000,
            read_cache_size: 5000,
            lock_timeout_poll_interval: Duration::from_secs(1),
            journal_path: PathBuf::from("locks"),
            administrators_principal: "administrators".to_string(),
            everyone_principal: "everyone".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.entry_collector_cache_size, 5000);
        assert_eq!(config.read_cache_size, 5000);
        assert_eq!(config.lock_timeout_poll_interval, Duration::from_secs(1));
        assert!(!config.omit_default_permissions);
    }
}
