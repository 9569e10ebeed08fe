//! Static configuration for a single upstream provider.
//!
//! A [`ProviderConfig`] describes one named upstream (e.g. a specific LLM
//! vendor) and the pool of API keys available to it. Everything here is
//! immutable once built; runtime state (circuit breakers, quota windows,
//! health samples) lives in [`crate::key_manager::KeyManager`] instead.

use std::collections::HashMap;
use std::time::Duration;

/// Aggregate health classification for a provider or key, derived from its
/// recent sliding window of outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderStatus::Healthy => write!(f, "healthy"),
            ProviderStatus::Degraded => write!(f, "degraded"),
            ProviderStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Strategy used by [`crate::router::Router`] to pick among healthy
/// candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingStrategy {
    #[default]
    PriorityFailover,
    RoundRobin,
    Weighted,
    LeastLatency,
}

/// Errors raised while validating a [`ProviderConfigBuilder`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("provider_id must not be empty")]
    MissingProviderId,
    #[error("provider {provider_id} must have at least one api key")]
    NoApiKeys { provider_id: String },
    #[error("provider {provider_id} weight must be >= 1")]
    InvalidWeight { provider_id: String },
    #[error("provider {provider_id} timeout must be greater than zero and at most {max:?}")]
    InvalidTimeout { provider_id: String, max: Duration },
    #[error("provider {provider_id} window must be greater than zero")]
    InvalidWindow { provider_id: String },
    #[error("provider {provider_id} {field} must be within [0.0, 1.0], got {value}")]
    InvalidThreshold { provider_id: String, field: &'static str, value: f64 },
}

/// Immutable configuration for one upstream provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_keys: Vec<String>,
    pub priority: i32,
    pub weight: u32,
    pub rpm_limit: u64,
    pub tpm_limit: u64,
    pub timeout: Duration,
    pub cb_failure_threshold: usize,
    pub cb_cooldown: Duration,
    pub max_retries: usize,
    /// Sliding window used by this provider's health tracker and quota
    /// manager (spec's `windowSeconds`).
    pub window: Duration,
    /// Windowed failure rate at or above which a key/provider is DEGRADED.
    pub degraded_threshold: f64,
    /// Windowed failure rate at or above which a key/provider is UNHEALTHY.
    pub unhealthy_threshold: f64,
    /// Fraction of `rpm_limit` usage at which a quota warning fires once.
    pub warning_threshold: f64,
    pub metadata: HashMap<String, String>,
}

impl ProviderConfig {
    /// Start building a config for `provider_id`.
    pub fn builder(provider_id: impl Into<String>) -> ProviderConfigBuilder {
        ProviderConfigBuilder::new(provider_id)
    }

    /// Whether this provider has at least one non-blank configured API key.
    /// A key list containing only empty/whitespace strings counts as none.
    pub fn has_keys(&self) -> bool {
        !self.api_keys.is_empty() && self.api_keys.iter().any(|k| !k.trim().is_empty())
    }
}

/// Validating builder for [`ProviderConfig`].
///
/// Defaults mirror the provider-pool conventions used elsewhere in this
/// codebase: priority `10`, weight `1`, a 60 rpm / unlimited tpm budget, a
/// 60s per-attempt timeout, and a circuit breaker that trips after 5
/// consecutive failures with a 30s cooldown.
#[derive(Debug, Clone)]
pub struct ProviderConfigBuilder {
    provider_id: String,
    api_keys: Vec<String>,
    priority: i32,
    weight: u32,
    rpm_limit: u64,
    tpm_limit: u64,
    timeout: Duration,
    cb_failure_threshold: usize,
    cb_cooldown: Duration,
    max_retries: usize,
    window: Duration,
    degraded_threshold: f64,
    unhealthy_threshold: f64,
    warning_threshold: f64,
    metadata: HashMap<String, String>,
}

impl ProviderConfigBuilder {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            api_keys: Vec::new(),
            priority: 10,
            weight: 1,
            rpm_limit: 60,
            tpm_limit: 0,
            timeout: Duration::from_secs(60),
            cb_failure_threshold: 5,
            cb_cooldown: Duration::from_secs(30),
            max_retries: 2,
            window: Duration::from_secs(60),
            degraded_threshold: 0.30,
            unhealthy_threshold: 0.60,
            warning_threshold: 0.90,
            metadata: HashMap::new(),
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.push(key.into());
        self
    }

    pub fn api_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.api_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn rpm_limit(mut self, rpm_limit: u64) -> Self {
        self.rpm_limit = rpm_limit;
        self
    }

    pub fn tpm_limit(mut self, tpm_limit: u64) -> Self {
        self.tpm_limit = tpm_limit;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cb_failure_threshold(mut self, threshold: usize) -> Self {
        self.cb_failure_threshold = threshold;
        self
    }

    pub fn cb_cooldown(mut self, cooldown: Duration) -> Self {
        self.cb_cooldown = cooldown;
        self
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sliding window for this provider's health tracker and quota manager
    /// (spec's `windowSeconds`). Default 60s.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Windowed failure rate at or above which a key/provider reports
    /// DEGRADED. Default `0.30`.
    pub fn degraded_threshold(mut self, threshold: f64) -> Self {
        self.degraded_threshold = threshold;
        self
    }

    /// Windowed failure rate at or above which a key/provider reports
    /// UNHEALTHY. Default `0.60`.
    pub fn unhealthy_threshold(mut self, threshold: f64) -> Self {
        self.unhealthy_threshold = threshold;
        self
    }

    /// Fraction of `rpm_limit` usage at which a single quota warning fires.
    /// Default `0.90`.
    pub fn warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ProviderConfig, ConfigError> {
        if self.provider_id.trim().is_empty() {
            return Err(ConfigError::MissingProviderId);
        }
        if self.api_keys.is_empty() {
            return Err(ConfigError::NoApiKeys { provider_id: self.provider_id });
        }
        if self.weight == 0 {
            return Err(ConfigError::InvalidWeight { provider_id: self.provider_id });
        }
        if self.timeout.is_zero() || self.timeout > crate::timeout::MAX_TIMEOUT {
            return Err(ConfigError::InvalidTimeout {
                provider_id: self.provider_id,
                max: crate::timeout::MAX_TIMEOUT,
            });
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidWindow { provider_id: self.provider_id });
        }
        for (field, value) in [
            ("degraded_threshold", self.degraded_threshold),
            ("unhealthy_threshold", self.unhealthy_threshold),
            ("warning_threshold", self.warning_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { provider_id: self.provider_id, field, value });
            }
        }

        Ok(ProviderConfig {
            provider_id: self.provider_id,
            api_keys: self.api_keys,
            priority: self.priority,
            weight: self.weight,
            rpm_limit: self.rpm_limit,
            tpm_limit: self.tpm_limit,
            timeout: self.timeout,
            cb_failure_threshold: self.cb_failure_threshold,
            cb_cooldown: self.cb_cooldown,
            max_retries: self.max_retries,
            window: self.window,
            degraded_threshold: self.degraded_threshold,
            unhealthy_threshold: self.unhealthy_threshold,
            warning_threshold: self.warning_threshold,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let cfg = ProviderConfig::builder("openai").api_key("sk-1").build().unwrap();
        assert_eq!(cfg.priority, 10);
        assert_eq!(cfg.weight, 1);
        assert_eq!(cfg.rpm_limit, 60);
        assert_eq!(cfg.tpm_limit, 0);
        assert_eq!(cfg.timeout, Duration::from_secs(60));
        assert_eq!(cfg.cb_failure_threshold, 5);
        assert_eq!(cfg.cb_cooldown, Duration::from_secs(30));
        assert_eq!(cfg.max_retries, 2);
        assert!(cfg.has_keys());
    }

    #[test]
    fn builder_rejects_empty_provider_id() {
        let err = ProviderConfig::builder("  ").api_key("k").build().unwrap_err();
        assert_eq!(err, ConfigError::MissingProviderId);
    }

    #[test]
    fn builder_rejects_no_keys() {
        let err = ProviderConfig::builder("openai").build().unwrap_err();
        assert_eq!(err, ConfigError::NoApiKeys { provider_id: "openai".into() });
    }

    #[test]
    fn builder_rejects_zero_weight() {
        let err = ProviderConfig::builder("openai")
            .api_key("k")
            .weight(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidWeight { provider_id: "openai".into() });
    }

    #[test]
    fn has_keys_false_without_any() {
        let cfg = ProviderConfig {
            provider_id: "p".into(),
            api_keys: vec![],
            priority: 10,
            weight: 1,
            rpm_limit: 60,
            tpm_limit: 0,
            timeout: Duration::from_secs(60),
            cb_failure_threshold: 5,
            cb_cooldown: Duration::from_secs(30),
            max_retries: 2,
            window: Duration::from_secs(60),
            degraded_threshold: 0.30,
            unhealthy_threshold: 0.60,
            warning_threshold: 0.90,
            metadata: HashMap::new(),
        };
        assert!(!cfg.has_keys());
    }

    #[test]
    fn routing_strategy_defaults_to_priority_failover() {
        assert_eq!(RoutingStrategy::default(), RoutingStrategy::PriorityFailover);
    }

    #[test]
    fn has_keys_false_when_all_keys_are_blank() {
        let cfg = ProviderConfig::builder("openai").api_key("  ").api_key("").build().unwrap();
        assert!(!cfg.has_keys());
    }

    #[test]
    fn has_keys_true_when_at_least_one_key_is_non_blank() {
        let cfg = ProviderConfig::builder("openai").api_key("  ").api_key("sk-real").build().unwrap();
        assert!(cfg.has_keys());
    }
}
