//! Env-var-driven tunables, read through the mockable `EnvVarQuery` trait
//! so the defaults path is unit-testable without mutating process-global
//! environment state.

use leaderslice_shared::os::env_var::EnvVarQuery;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub max_concurrent_reconciles: usize,
    pub cache_cap_per_namespace: usize,
    pub cache_refill_timeout: Duration,
    pub metrics_refresh_timeout: Duration,
    pub readiness_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_concurrent_reconciles: 10,
            cache_cap_per_namespace: 1000,
            cache_refill_timeout: Duration::from_secs(10),
            metrics_refresh_timeout: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(2),
            retry_max_attempts: 3,
            retry_initial_backoff: Duration::from_millis(100),
            retry_max_backoff: Duration::from_secs(5),
            metrics_port: 8080,
        }
    }
}

fn parse_env<T: std::str::FromStr>(query: &dyn EnvVarQuery, name: &'static str, default: T) -> T {
    query
        .get_env_var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env(query: &dyn EnvVarQuery) -> Self {
        let defaults = Config::default();
        Config {
            max_concurrent_reconciles: parse_env(
                query,
                "LEADERSLICE_MAX_CONCURRENT_RECONCILES",
                defaults.max_concurrent_reconciles,
            ),
            cache_cap_per_namespace: parse_env(
                query,
                "LEADERSLICE_CACHE_CAP_PER_NAMESPACE",
                defaults.cache_cap_per_namespace,
            ),
            cache_refill_timeout: Duration::from_secs(parse_env(
                query,
                "LEADERSLICE_CACHE_REFILL_TIMEOUT_SECS",
                defaults.cache_refill_timeout.as_secs(),
            )),
            metrics_refresh_timeout: Duration::from_secs(parse_env(
                query,
                "LEADERSLICE_METRICS_REFRESH_TIMEOUT_SECS",
                defaults.metrics_refresh_timeout.as_secs(),
            )),
            readiness_timeout: Duration::from_secs(parse_env(
                query,
                "LEADERSLICE_READINESS_TIMEOUT_SECS",
                defaults.readiness_timeout.as_secs(),
            )),
            retry_max_attempts: parse_env(
                query,
                "LEADERSLICE_RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            ),
            retry_initial_backoff: Duration::from_millis(parse_env(
                query,
                "LEADERSLICE_RETRY_INITIAL_BACKOFF_MS",
                defaults.retry_initial_backoff.as_millis() as u64,
            )),
            retry_max_backoff: Duration::from_millis(parse_env(
                query,
                "LEADERSLICE_RETRY_MAX_BACKOFF_MS",
                defaults.retry_max_backoff.as_millis() as u64,
            )),
            metrics_port: parse_env(
                query,
                leaderslice_shared::metrics::METRICS_PORT_LABEL,
                defaults.metrics_port,
            ),
        }
    }

    pub fn retry_policy(&self) -> leaderslice_shared::retry::RetryPolicy {
        leaderslice_shared::retry::RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: self.retry_initial_backoff,
            max_backoff: self.retry_max_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaderslice_shared::os::env_var::MockEnvVarQuery;

    #[test]
    fn defaults_when_env_absent() {
        let mut mock = MockEnvVarQuery::new();
        mock.expect_get_env_var()
            .returning(|_| Err(std::env::VarError::NotPresent));
        let cfg = Config::from_env(&mock);
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn overrides_applied_from_env() {
        let mut mock = MockEnvVarQuery::new();
        mock.expect_get_env_var().returning(|name| {
            if name == "LEADERSLICE_MAX_CONCURRENT_RECONCILES" {
                Ok("25".to_string())
            } else {
                Err(std::env::VarError::NotPresent)
            }
        });
        let cfg = Config::from_env(&mock);
        assert_eq!(cfg.max_concurrent_reconciles, 25);
        assert_eq!(cfg.cache_cap_per_namespace, Config::default().cache_cap_per_namespace);
    }
}
