//! Resilient multi-provider gateway — the crate's main entry point.
//!
//! Composes [`Router`], [`KeyManager`], and the per-key circuit breaker /
//! quota / health machinery into a single autonomous resilience layer.
//! Callers hand in a request closure; the gateway handles provider
//! selection, key rotation, retries, capped exponential backoff, and
//! failover across the whole provider pool.

use crate::circuit_breaker::Transition;
use crate::error::ResilienceError;
use crate::key_manager::KeyManager;
use crate::provider::{ProviderConfig, ProviderStatus, RoutingStrategy};
use crate::router::Router;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::sinks::emit_best_effort;
use crate::telemetry::{
    CircuitBreakerEvent, GatewayEvent, GatewayOutcome, NullSink, QuotaEvent, RequestOutcome,
    RetryEvent, TelemetrySink, TimeoutEvent,
};
use crate::timeout::TimeoutPolicy;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Raised when every provider in the fallback chain has been exhausted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("all providers exhausted: {}", .errors.keys().cloned().collect::<Vec<_>>().join(", "))]
pub struct AllProvidersExhausted {
    pub errors: HashMap<String, String>,
}

/// Errors [`Gateway::execute`] can return.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    AllProvidersExhausted(#[from] AllProvidersExhausted),
}

/// Point-in-time aggregate health for one provider, summed across its keys.
///
/// Per-key latency percentiles can't be meaningfully averaged without the
/// raw samples, so the aggregate percentiles are zeroed; query individual
/// keys through [`KeyManager::snapshots`] for real percentile data.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub status: ProviderStatus,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    pub success_rate: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub last_error: Option<String>,
    pub circuit_state: String,
    pub quota_remaining_pct: f64,
    pub current_key_index: usize,
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder<T: TelemetrySink = NullSink> {
    providers: Vec<ProviderConfig>,
    strategy: RoutingStrategy,
    max_retries_per_provider: usize,
    backoff_base: Duration,
    backoff_max: Duration,
    sleeper: Arc<dyn Sleeper>,
    telemetry: T,
}

impl Default for GatewayBuilder<NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder<NullSink> {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            strategy: RoutingStrategy::PriorityFailover,
            max_retries_per_provider: 2,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            sleeper: Arc::new(TokioSleeper),
            telemetry: NullSink,
        }
    }
}

impl<T: TelemetrySink> GatewayBuilder<T> {
    pub fn providers(mut self, providers: Vec<ProviderConfig>) -> Self {
        self.providers = providers;
        self
    }

    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Default retry budget used if a [`ProviderConfig`] doesn't override
    /// it. Per-provider `max_retries` always takes precedence once set.
    pub fn max_retries_per_provider(mut self, retries: usize) -> Self {
        self.max_retries_per_provider = retries;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn telemetry<U: TelemetrySink>(self, telemetry: U) -> GatewayBuilder<U> {
        GatewayBuilder {
            providers: self.providers,
            strategy: self.strategy,
            max_retries_per_provider: self.max_retries_per_provider,
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
            sleeper: self.sleeper,
            telemetry,
        }
    }

    pub fn build(self) -> Gateway<T> {
        let key_managers: HashMap<String, Arc<KeyManager>> = self
            .providers
            .iter()
            .map(|cfg| (cfg.provider_id.clone(), Arc::new(KeyManager::new(cfg))))
            .collect();

        let router = Router::new(self.providers, self.strategy, key_managers.clone());

        Gateway {
            key_managers,
            router,
            max_retries_per_provider: self.max_retries_per_provider,
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
            sleeper: self.sleeper,
            telemetry: self.telemetry,
        }
    }
}

/// Autonomous resilience layer wrapping any async provider call.
///
/// ```ignore
/// let gateway = Gateway::builder().provider(cfg).build();
/// let result = gateway
///     .execute(|cfg, key| call_llm(cfg, key, prompt.clone()), 2048, None)
///     .await?;
/// ```
///
/// The request closure receives a [`ProviderConfig`] and the selected API
/// key, and must return the result or an error on failure.
pub struct Gateway<T: TelemetrySink = NullSink> {
    key_managers: HashMap<String, Arc<KeyManager>>,
    router: Router,
    #[allow(dead_code)]
    max_retries_per_provider: usize,
    backoff_base: Duration,
    backoff_max: Duration,
    sleeper: Arc<dyn Sleeper>,
    telemetry: T,
}

impl Gateway<NullSink> {
    pub fn builder() -> GatewayBuilder<NullSink> {
        GatewayBuilder::new()
    }
}

impl<T: TelemetrySink> Gateway<T> {
    /// Execute a request with automatic key rotation, retries, and
    /// provider failover.
    ///
    /// `preferred_provider`, if given and present in the pool, is tried
    /// first regardless of routing strategy; every other provider is then
    /// tried in priority order.
    pub async fn execute<Req, Fut, Res, E>(
        &self,
        request_fn: Req,
        estimated_tokens: u64,
        preferred_provider: Option<&str>,
    ) -> Result<Res, GatewayError>
    where
        Req: Fn(&ProviderConfig, &str) -> Fut,
        Fut: Future<Output = Result<Res, E>> + Send,
        Res: Send,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut errors: HashMap<String, String> = HashMap::new();
        let mut attempted: HashSet<String> = HashSet::new();

        let chain = self.build_chain(preferred_provider, estimated_tokens);

        for provider_cfg in &chain {
            let pid = provider_cfg.provider_id.clone();
            if attempted.contains(&pid) {
                continue;
            }
            attempted.insert(pid.clone());

            if let Some(result) = self
                .try_provider(provider_cfg, &request_fn, estimated_tokens, &mut errors)
                .await
            {
                if attempted.len() > 1 {
                    let failed: Vec<&String> = attempted.iter().filter(|p| **p != pid).collect();
                    tracing::info!(
                        provider = %pid,
                        attempts = attempted.len(),
                        failed_providers = ?failed,
                        "provider_failover_success"
                    );
                    emit_best_effort(
                        &self.telemetry,
                        GatewayEvent::Gateway(GatewayOutcome::FailoverSuccess {
                            attempted_providers: attempted.len(),
                        }),
                    )
                    .await;
                }
                return Ok(result);
            }
        }

        tracing::error!(providers = ?attempted, reasons = ?errors, "all_providers_exhausted");
        emit_best_effort(
            &self.telemetry,
            GatewayEvent::Gateway(GatewayOutcome::AllProvidersExhausted {
                providers_tried: attempted.len(),
            }),
        )
        .await;
        Err(GatewayError::AllProvidersExhausted(AllProvidersExhausted { errors }))
    }

    async fn try_provider<Req, Fut, Res, E>(
        &self,
        cfg: &ProviderConfig,
        request_fn: &Req,
        estimated_tokens: u64,
        errors: &mut HashMap<String, String>,
    ) -> Option<Res>
    where
        Req: Fn(&ProviderConfig, &str) -> Fut,
        Fut: Future<Output = Result<Res, E>> + Send,
        Res: Send,
        E: std::error::Error + Send + Sync + 'static,
    {
        let pid = &cfg.provider_id;
        let km = self.key_managers.get(pid)?;

        let max_attempts = cfg.max_retries.saturating_add(1).min(km.key_count().max(1));
        let timeout_policy =
            TimeoutPolicy::new(cfg.timeout).expect("ProviderConfigBuilder validates timeout bounds");

        for attempt in 0..max_attempts {
            for (key_index, transition) in km.poll_transitions() {
                self.emit_circuit_transition(pid, key_index, Some(transition)).await;
            }

            let key_state = match km.select_key(estimated_tokens) {
                Some(ks) => ks,
                None => {
                    errors.insert(pid.clone(), "no_usable_keys".to_string());
                    tracing::warn!(
                        provider = %pid,
                        reasons = ?km.exhausted_errors(),
                        "provider_keys_exhausted"
                    );
                    return None;
                }
            };
            let key_index = key_state.index;
            let api_key = key_state.api_key.clone();

            let start = Instant::now();
            let outcome = timeout_policy
                .execute(|| async { request_fn(cfg, &api_key).await.map_err(ResilienceError::Inner) })
                .await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(result) => {
                    let (transition, warning) = km.record_success(key_index, latency_ms, estimated_tokens);
                    self.emit_circuit_transition(pid, key_index, transition).await;
                    self.emit_quota_warning(pid, key_index, warning).await;
                    tracing::info!(provider = %pid, attempt = attempt + 1, key_idx = key_index, latency_ms, "provider_request_success");
                    emit_best_effort(
                        &self.telemetry,
                        GatewayEvent::Request(RequestOutcome::Success {
                            duration: Duration::from_secs_f64(latency_ms / 1000.0),
                        }),
                    )
                    .await;
                    return Some(result);
                }
                Err(ResilienceError::Timeout { timeout, .. }) => {
                    let error_msg = format!("Timeout after {:?}", timeout);
                    let transition = km.record_failure(key_index, error_msg, latency_ms);
                    self.emit_circuit_transition(pid, key_index, transition).await;
                    tracing::warn!(provider = %pid, attempt = attempt + 1, key_idx = key_index, timeout = ?timeout, "provider_timeout");
                    emit_best_effort(
                        &self.telemetry,
                        GatewayEvent::Timeout(TimeoutEvent::Occurred {
                            provider_hash: hash_str(pid),
                            timeout,
                        }),
                    )
                    .await;
                }
                Err(ResilienceError::Inner(exc)) => {
                    let error_msg = exc.to_string();
                    let transition = km.record_failure(key_index, error_msg.clone(), latency_ms);
                    self.emit_circuit_transition(pid, key_index, transition).await;
                    tracing::warn!(provider = %pid, attempt = attempt + 1, key_idx = key_index, error = %error_msg, latency_ms, "provider_request_failed");
                    emit_best_effort(
                        &self.telemetry,
                        GatewayEvent::Request(RequestOutcome::Failure {
                            duration: Duration::from_secs_f64(latency_ms / 1000.0),
                        }),
                    )
                    .await;
                }
            }

            if attempt < max_attempts - 1 {
                let delay = crate::backoff::Backoff::Exponential {
                    base: self.backoff_base,
                    max: Some(self.backoff_max),
                }
                .delay(attempt + 1);
                emit_best_effort(
                    &self.telemetry,
                    GatewayEvent::Retry(RetryEvent::Backoff { attempt: attempt + 1, delay }),
                )
                .await;
                self.sleeper.sleep(delay).await;
            }
        }

        errors.insert(pid.clone(), "exhausted_attempts".to_string());
        None
    }

    async fn emit_circuit_transition(&self, provider: &str, key_index: usize, transition: Option<Transition>) {
        let Some(transition) = transition else { return };
        let event = match transition {
            Transition::ClosedToOpen { consecutive_failures } => {
                tracing::warn!(provider, key_index, failures = consecutive_failures, "circuit_breaker_opened");
                CircuitBreakerEvent::Opened { provider: provider.to_string(), key_index, failure_count: consecutive_failures }
            }
            Transition::HalfOpenToOpen { consecutive_failures } => {
                tracing::warn!(provider, key_index, failures = consecutive_failures, "circuit_breaker_reopened");
                CircuitBreakerEvent::Opened { provider: provider.to_string(), key_index, failure_count: consecutive_failures }
            }
            Transition::HalfOpenToClosed => {
                tracing::info!(provider, key_index, "circuit_breaker_closed");
                CircuitBreakerEvent::Closed { provider: provider.to_string(), key_index }
            }
            Transition::OpenToHalfOpen => {
                tracing::info!(provider, key_index, "circuit_breaker_half_open");
                CircuitBreakerEvent::HalfOpen { provider: provider.to_string(), key_index }
            }
        };
        emit_best_effort(&self.telemetry, GatewayEvent::CircuitBreaker(event)).await;
    }

    async fn emit_quota_warning(&self, provider: &str, key_index: usize, warning: Option<u32>) {
        if let Some(usage_pct) = warning {
            tracing::warn!(provider, key_index, usage_pct, "quota_warning");
            emit_best_effort(
                &self.telemetry,
                GatewayEvent::Quota(QuotaEvent::Warning { provider: provider.to_string(), key_index, usage_pct }),
            )
            .await;
        }
    }

    /// Build the ordered list of providers to try: `preferred_provider`
    /// first if present in the pool, then the rest of the fallback chain
    /// in priority order.
    fn build_chain(&self, preferred: Option<&str>, estimated_tokens: u64) -> Vec<&ProviderConfig> {
        let mut chain = self.router.fallback_chain(&HashSet::new(), estimated_tokens);

        if let Some(preferred) = preferred {
            if let Some(pos) = chain.iter().position(|c| c.provider_id == preferred) {
                let preferred_cfg = chain.remove(pos);
                chain.insert(0, preferred_cfg);
            }
        }

        chain
    }

    /// Aggregate health for one provider, summed across its key pool.
    pub fn get_health(&self, provider_id: &str) -> Option<ProviderHealth> {
        let km = self.key_managers.get(provider_id)?;

        let mut total_requests = 0;
        let mut total_successes = 0;
        let mut total_failures = 0;
        let mut usable_keys = 0;

        for ks in km.keys() {
            let snap = ks.health_tracker.snapshot();
            total_requests += snap.total_requests;
            total_successes += snap.total_successes;
            total_failures += snap.total_failures;
            if ks.circuit_breaker.can_execute() {
                usable_keys += 1;
            }
        }

        let status = if usable_keys == 0 && km.key_count() > 0 {
            ProviderStatus::Unhealthy
        } else if usable_keys < km.key_count() {
            ProviderStatus::Degraded
        } else {
            ProviderStatus::Healthy
        };

        let success_rate = if total_requests > 0 {
            total_successes as f64 / total_requests as f64
        } else {
            1.0
        };

        Some(ProviderHealth {
            provider_id: provider_id.to_string(),
            status,
            total_requests,
            total_successes,
            total_failures,
            consecutive_failures: 0,
            success_rate: (success_rate * 10_000.0).round() / 10_000.0,
            // Per-key percentiles can't be meaningfully aggregated without
            // raw samples; query KeyManager::snapshots for real data.
            latency_p50_ms: 0.0,
            latency_p95_ms: 0.0,
            latency_p99_ms: 0.0,
            last_error: Some("Check individual key logs".to_string()),
            circuit_state: "closed".to_string(),
            quota_remaining_pct: 100.0,
            current_key_index: km.current_key_index(),
        })
    }

    /// Aggregate health for every configured provider.
    pub fn get_all_health(&self) -> Vec<ProviderHealth> {
        self.key_managers
            .keys()
            .filter_map(|pid| self.get_health(pid))
            .collect()
    }

    /// Force every key of one provider back to its initial state: circuit
    /// breakers CLOSED and quota windows cleared.
    pub fn reset_provider(&self, provider_id: &str) {
        if let Some(km) = self.key_managers.get(provider_id) {
            km.reset();
        }
    }

    /// Force-reset every provider's keys: circuit breakers and quota windows.
    pub fn reset_all(&self) {
        for km in self.key_managers.values() {
            km.reset();
        }
    }
}

fn hash_str(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::InstantSleeper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct CallError(String);

    impl std::fmt::Display for CallError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for CallError {}

    fn provider(id: &str, priority: i32) -> ProviderConfig {
        ProviderConfig::builder(id)
            .api_key("key-a")
            .api_key("key-b")
            .priority(priority)
            .cb_failure_threshold(2)
            .max_retries(1)
            .build()
            .unwrap()
    }

    fn gateway(providers: Vec<ProviderConfig>) -> Gateway<NullSink> {
        GatewayBuilder::new()
            .providers(providers)
            .sleeper(Arc::new(InstantSleeper))
            .build()
    }

    #[tokio::test]
    async fn happy_path_succeeds_on_first_attempt() {
        let gw = gateway(vec![provider("openai", 10)]);
        let result = gw
            .execute(|_cfg, key| async move { Ok::<_, CallError>(key.to_string()) }, 0, None)
            .await
            .unwrap();
        assert_eq!(result, "key-a");
    }

    #[tokio::test]
    async fn rotates_keys_across_successive_calls() {
        let gw = gateway(vec![provider("openai", 10)]);
        let first = gw.execute(|_c, k| async move { Ok::<_, CallError>(k.to_string()) }, 0, None).await.unwrap();
        let second = gw.execute(|_c, k| async move { Ok::<_, CallError>(k.to_string()) }, 0, None).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn fails_over_to_next_provider_when_first_exhausts_keys() {
        let gw = gateway(vec![provider("primary", 10), provider("secondary", 20)]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = gw
            .execute(
                move |cfg, _key| {
                    let calls = calls_clone.clone();
                    let id = cfg.provider_id.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if id == "primary" {
                            Err(CallError("boom".into()))
                        } else {
                            Ok("ok".to_string())
                        }
                    }
                },
                0,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result, "ok");
        // primary: max_attempts = min(max_retries + 1, key_count) = 2 calls (one per key),
        // then secondary succeeds on its first try.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn all_providers_exhausted_reports_per_provider_errors() {
        let gw = gateway(vec![provider("only", 10)]);
        let err = gw
            .execute(|_c, _k| async move { Err::<String, _>(CallError("down".into())) }, 0, None)
            .await
            .unwrap_err();

        match err {
            GatewayError::AllProvidersExhausted(AllProvidersExhausted { errors }) => {
                assert_eq!(errors.get("only"), Some(&"exhausted_attempts".to_string()));
            }
        }
    }

    #[tokio::test]
    async fn preferred_provider_is_tried_first() {
        let gw = gateway(vec![provider("a", 10), provider("b", 20)]);
        let result = gw
            .execute(
                |cfg, _key| {
                    let id = cfg.provider_id.clone();
                    async move { Ok::<_, CallError>(id) }
                },
                0,
                Some("b"),
            )
            .await
            .unwrap();
        assert_eq!(result, "b");
    }

    #[tokio::test]
    async fn circuit_trips_after_repeated_failures_and_provider_becomes_unhealthy() {
        let gw = gateway(vec![provider("flaky", 10)]);
        for _ in 0..3 {
            let _ = gw
                .execute(|_c, _k| async move { Err::<String, _>(CallError("boom".into())) }, 0, None)
                .await;
        }

        let health = gw.get_health("flaky").unwrap();
        assert_eq!(health.status, ProviderStatus::Unhealthy);
    }

    #[tokio::test]
    async fn reset_provider_restores_availability() {
        let gw = gateway(vec![provider("flaky", 10)]);
        for _ in 0..3 {
            let _ = gw
                .execute(|_c, _k| async move { Err::<String, _>(CallError("boom".into())) }, 0, None)
                .await;
        }
        gw.reset_provider("flaky");

        let result = gw
            .execute(|_c, _k| async move { Ok::<_, CallError>("recovered".to_string()) }, 0, None)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn get_all_health_returns_one_entry_per_provider() {
        let gw = gateway(vec![provider("a", 10), provider("b", 20)]);
        let all = gw.get_all_health();
        assert_eq!(all.len(), 2);
    }
}
