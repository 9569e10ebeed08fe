use std::time::Duration;
use std::fmt;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Structured events emitted by gateway components during execution.
///
/// Every component that makes an observable decision (a circuit trips, a
/// quota warning crosses its threshold, an attempt backs off, a provider
/// chain is exhausted) emits one of these in addition to its `tracing` call.
/// Callers can subscribe via a [`crate::telemetry::TelemetrySink`] to build
/// dashboards or metrics exporters without parsing log lines.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Circuit breaker state transitions.
    CircuitBreaker(CircuitBreakerEvent),
    /// Quota threshold crossings.
    Quota(QuotaEvent),
    /// Backoff/retry attempts within a single provider.
    Retry(RetryEvent),
    /// Per-attempt timeouts.
    Timeout(TimeoutEvent),
    /// Outcome of a single provider attempt.
    Request(RequestOutcome),
    /// Outcome of a full `Gateway::execute` call across providers.
    Gateway(GatewayOutcome),
}

/// Events emitted by a per-key circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Circuit transitioned to open.
    Opened { provider: String, key_index: usize, failure_count: usize },
    /// Circuit transitioned to half-open after its cooldown elapsed.
    HalfOpen { provider: String, key_index: usize },
    /// Circuit transitioned back to closed.
    Closed { provider: String, key_index: usize },
}

/// Events emitted by a per-key quota manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    /// Usage crossed the configured warning threshold within the window.
    Warning { provider: String, key_index: usize, usage_pct: u32 },
}

/// A backoff delay taken between attempts on the same or a fallback provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A backoff sleep is about to be taken before the next attempt.
    Backoff { attempt: usize, delay: Duration },
}

/// Events emitted when a single attempt's timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    Occurred { provider_hash: u64, timeout: Duration },
}

/// Outcome of a single attempt against one provider key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success { duration: Duration },
    Failure { duration: Duration },
}

/// Outcome of an entire `Gateway::execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// The request eventually succeeded, possibly after failing over.
    FailoverSuccess { attempted_providers: usize },
    /// Every candidate provider was exhausted.
    AllProvidersExhausted { providers_tried: usize },
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEvent::CircuitBreaker(event) => write!(f, "CircuitBreaker::{}", event),
            GatewayEvent::Quota(event) => write!(f, "Quota::{}", event),
            GatewayEvent::Retry(event) => write!(f, "Retry::{}", event),
            GatewayEvent::Timeout(event) => write!(f, "Timeout::{}", event),
            GatewayEvent::Request(event) => write!(f, "Request::{}", event),
            GatewayEvent::Gateway(event) => write!(f, "Gateway::{}", event),
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { provider, key_index, failure_count } => {
                write!(f, "Opened({provider}:{key_index}, failures={failure_count})")
            }
            CircuitBreakerEvent::HalfOpen { provider, key_index } => {
                write!(f, "HalfOpen({provider}:{key_index})")
            }
            CircuitBreakerEvent::Closed { provider, key_index } => {
                write!(f, "Closed({provider}:{key_index})")
            }
        }
    }
}

impl fmt::Display for QuotaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaEvent::Warning { provider, key_index, usage_pct } => {
                write!(f, "Warning({provider}:{key_index}, usage={usage_pct}%)")
            }
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Backoff { attempt, delay } => {
                write!(f, "Backoff(#{attempt}, delay={delay:?})")
            }
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout, .. } => write!(f, "Occurred(timeout={timeout:?})"),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success { duration } => write!(f, "Success(duration={duration:?})"),
            RequestOutcome::Failure { duration } => write!(f, "Failure(duration={duration:?})"),
        }
    }
}

impl fmt::Display for GatewayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayOutcome::FailoverSuccess { attempted_providers } => {
                write!(f, "FailoverSuccess(providers={attempted_providers})")
            }
            GatewayOutcome::AllProvidersExhausted { providers_tried } => {
                write!(f, "AllProvidersExhausted(providers={providers_tried})")
            }
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a [`GatewayEvent`] into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &GatewayEvent) -> serde_json::Value {
    match event {
        GatewayEvent::CircuitBreaker(c) => match c {
            CircuitBreakerEvent::Opened { provider, key_index, failure_count } => json!({
                "kind": "circuit_opened",
                "provider": provider,
                "key_index": *key_index,
                "failures": *failure_count,
            }),
            CircuitBreakerEvent::HalfOpen { provider, key_index } => json!({
                "kind": "circuit_half_open",
                "provider": provider,
                "key_index": *key_index,
            }),
            CircuitBreakerEvent::Closed { provider, key_index } => json!({
                "kind": "circuit_closed",
                "provider": provider,
                "key_index": *key_index,
            }),
        },
        GatewayEvent::Quota(q) => match q {
            QuotaEvent::Warning { provider, key_index, usage_pct } => json!({
                "kind": "quota_warning",
                "provider": provider,
                "key_index": *key_index,
                "usage_pct": *usage_pct,
            }),
        },
        GatewayEvent::Retry(r) => match r {
            RetryEvent::Backoff { attempt, delay } => json!({
                "kind": "retry_backoff",
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
        },
        GatewayEvent::Timeout(t) => match t {
            TimeoutEvent::Occurred { timeout, .. } => json!({
                "kind": "timeout",
                "timeout_ms": clamp_u64(timeout.as_millis()),
            }),
        },
        GatewayEvent::Request(r) => match r {
            RequestOutcome::Success { duration } => json!({
                "kind": "request_success",
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
            RequestOutcome::Failure { duration } => json!({
                "kind": "request_failure",
                "duration_ms": clamp_u64(duration.as_millis()),
            }),
        },
        GatewayEvent::Gateway(g) => match g {
            GatewayOutcome::FailoverSuccess { attempted_providers } => json!({
                "kind": "failover_success",
                "attempted_providers": *attempted_providers,
            }),
            GatewayOutcome::AllProvidersExhausted { providers_tried } => json!({
                "kind": "all_providers_exhausted",
                "providers_tried": *providers_tried,
            }),
        },
    }
}

#[cfg(all(test, feature = "telemetry-json"))]
mod json_tests {
    use super::*;

    #[test]
    fn circuit_opened_json() {
        let v = event_to_json(&GatewayEvent::CircuitBreaker(CircuitBreakerEvent::Opened {
            provider: "openai".into(),
            key_index: 0,
            failure_count: 5,
        }));
        assert_eq!(v["kind"], "circuit_opened");
        assert_eq!(v["failures"], 5);
    }

    #[test]
    fn quota_warning_json() {
        let v = event_to_json(&GatewayEvent::Quota(QuotaEvent::Warning {
            provider: "openai".into(),
            key_index: 1,
            usage_pct: 92,
        }));
        assert_eq!(v["kind"], "quota_warning");
        assert_eq!(v["usage_pct"], 92);
    }

    #[test]
    fn all_providers_exhausted_json() {
        let v = event_to_json(&GatewayEvent::Gateway(GatewayOutcome::AllProvidersExhausted {
            providers_tried: 3,
        }));
        assert_eq!(v["kind"], "all_providers_exhausted");
        assert_eq!(v["providers_tried"], 3);
    }

    #[test]
    fn telemetry_json_contains_no_auth_fields() {
        let v = event_to_json(&GatewayEvent::Request(RequestOutcome::Success {
            duration: Duration::from_millis(1),
        }));
        let s = serde_json::to_string(&v).unwrap();
        assert!(
            !s.contains("auth"),
            "telemetry JSON should not carry auth payloads; got {s}"
        );
    }
}
