//! Structured telemetry for gateway components.
//!
//! Every component that makes an observable decision emits a [`GatewayEvent`]
//! in addition to its `tracing` call. Events flow through [`TelemetrySink`]
//! implementations, which can log, buffer, or forward them to external
//! systems. Emission is always best-effort: a sink failure never affects the
//! outcome of the call that triggered it.

pub mod events;
pub mod sinks;

pub use events::{
    CircuitBreakerEvent, GatewayEvent, GatewayOutcome, QuotaEvent, RequestOutcome, RetryEvent,
    TimeoutEvent,
};
pub use sinks::{
    emit_best_effort, ComposedSinkError, FallbackSink, LogSink, MemorySink, MulticastSink,
    NullSink, StreamingSink, TelemetrySink,
};
