//! Convenient re-exports for common provider-gateway types.
pub use crate::{
    backoff::Backoff,
    circuit_breaker::{CircuitBreaker, CircuitState, Transition},
    clock::{Clock, MonotonicClock},
    error::ResilienceError,
    gateway::{AllProvidersExhausted, Gateway, GatewayBuilder, GatewayError, ProviderHealth},
    health::{HealthSnapshot, HealthTracker},
    key_manager::{KeyManager, KeyState},
    provider::{ConfigError, ProviderConfig, ProviderConfigBuilder, ProviderStatus, RoutingStrategy},
    quota::QuotaManager,
    router::Router,
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    telemetry::{
        CircuitBreakerEvent, FallbackSink, GatewayEvent, GatewayOutcome, LogSink, MemorySink,
        MulticastSink, NullSink, QuotaEvent, RequestOutcome, RetryEvent, StreamingSink,
        TelemetrySink, TimeoutEvent,
    },
    timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT},
};
