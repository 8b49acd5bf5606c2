//! Configuration for skylift-engine.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    /// Control-plane API configuration.
    #[serde(default)]
    pub api: ApiConfig,

    /// Convergence polling configuration.
    #[serde(default)]
    pub poll: PollConfig,
}

impl EngineConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `skylift.toml` in the current directory (if present)
    /// 3. Environment variables with `SKYLIFT_` prefix
    pub fn load() -> EngineResult<Self> {
        Figment::new()
            .merge(Toml::file("skylift.toml"))
            .merge(Env::prefixed("SKYLIFT_").split("__"))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> EngineResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SKYLIFT_").split("__"))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }
}

/// How remote service clients are constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiMode {
    /// Real HTTP clients against the regional control plane.
    #[default]
    Http,

    /// In-memory fakes for offline runs and tests.
    Mock,
}

/// Control-plane API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Client construction mode.
    #[serde(default)]
    pub mode: ApiMode,

    /// Endpoint template; `{region}` is substituted per region.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// The storage backend's default region; bucket creation in this region
    /// omits the location qualifier.
    #[serde(default = "default_storage_region")]
    pub default_storage_region: String,
}

fn default_endpoint() -> String {
    "https://platform.{region}.skylift.example.com".to_owned()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_storage_region() -> String {
    "us-east-1".to_owned()
}

impl ApiConfig {
    /// Resolve the endpoint for a region.
    #[must_use]
    pub fn endpoint_for(&self, region: &str) -> String {
        self.endpoint
            .replace("{region}", region)
            .trim_end_matches('/')
            .to_owned()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            mode: ApiMode::default(),
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            default_storage_region: default_storage_region(),
        }
    }
}

/// Convergence polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Seconds between status polls.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

const fn default_poll_interval_secs() -> u64 {
    5
}

impl PollConfig {
    /// The poll interval as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// A poll configuration with an explicit interval, used by tests.
    #[must_use]
    pub const fn with_interval_secs(interval_secs: u64) -> Self {
        Self { interval_secs }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Bounded exponential-backoff retry policy for remote calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (0 means exactly one attempt).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay before the first retry, in seconds; doubles per retry.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_base_delay_secs() -> u64 {
    5
}

impl RetryPolicy {
    /// Total attempts this policy allows (retries plus the initial attempt).
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry `n` (1-indexed): `base * 2^(n-1)`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_secs(self.base_delay_secs.saturating_mul(factor))
    }

    /// A policy that never retries, used where a single attempt is wanted.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_secs: 1,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.api.mode, ApiMode::Http);
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.poll.interval_secs, 5);
    }

    #[test]
    fn endpoint_substitutes_region() {
        let config = ApiConfig::default();
        let endpoint = config.endpoint_for("eu-west-1");
        assert_eq!(endpoint, "https://platform.eu-west-1.skylift.example.com");
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [api]
            mode = "mock"
            endpoint = "http://localhost:9400"
            default_storage_region = "eu-central-1"

            [poll]
            interval_secs = 1
        "#;

        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.api.mode, ApiMode::Mock);
        assert_eq!(config.api.endpoint_for("eu-west-1"), "http://localhost:9400");
        assert_eq!(config.api.default_storage_region, "eu-central-1");
        assert_eq!(config.poll.interval_secs, 1);
    }

    #[test]
    fn retry_delays_double() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_secs: 5,
        };
        assert_eq!(policy.attempts(), 4);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        assert_eq!(RetryPolicy::none().attempts(), 1);
    }
}
