//! Environment-driven service configuration.
//!
//! Transport/auth collaborators carry their own settings; this only covers
//! what the ledger core needs: where the database lives, where the accrual
//! service listens and how often to reconcile.

use std::time::Duration;

use tracing::warn;

const DEFAULT_ACCRUAL_ADDRESS: &str = "http://localhost:8081";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Postgres connection string (`DATABASE_URI`). Absent means the
    /// process-memory ledger is used.
    pub database_uri: Option<String>,
    /// Base URL of the accrual service (`ACCRUAL_SYSTEM_ADDRESS`).
    pub accrual_address: String,
    /// Reconciliation tick interval (`ACCRUAL_POLL_INTERVAL_SECS`).
    pub poll_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_uri: None,
            accrual_address: DEFAULT_ACCRUAL_ADDRESS.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (unit-testable seam).
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        config.database_uri = lookup("DATABASE_URI").filter(|v| !v.is_empty());

        if let Some(address) = lookup("ACCRUAL_SYSTEM_ADDRESS").filter(|v| !v.is_empty()) {
            config.accrual_address = address;
        }

        if let Some(raw) = lookup("ACCRUAL_POLL_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.poll_interval = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid ACCRUAL_POLL_INTERVAL_SECS"),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ServiceConfig::from_lookup(|_| None);
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.accrual_address, "http://localhost:8081");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("DATABASE_URI", "postgres://app@db/loyalty"),
            ("ACCRUAL_SYSTEM_ADDRESS", "http://accrual:9090"),
            ("ACCRUAL_POLL_INTERVAL_SECS", "5"),
        ]));
        assert_eq!(config.database_uri.as_deref(), Some("postgres://app@db/loyalty"));
        assert_eq!(config.accrual_address, "http://accrual:9090");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_interval_and_empty_values_fall_back() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("DATABASE_URI", ""),
            ("ACCRUAL_POLL_INTERVAL_SECS", "zero"),
        ]));
        assert_eq!(config.database_uri, None);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }
}
