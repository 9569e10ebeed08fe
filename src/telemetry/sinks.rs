use super::events::GatewayEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A telemetry sink that consumes gateway events.
///
/// Mirrors the shape of [`crate::Sleeper`]: a small async trait rather than a
/// `tower::Service`, since the gateway itself is not exposed as one. Emission
/// is always best-effort; sinks report failures through their own error type
/// but callers use [`emit_best_effort`] to swallow them.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    type SinkError: std::error::Error + Send + 'static;

    async fn emit(&self, event: GatewayEvent) -> Result<(), Self::SinkError>;
}

/// Emit an event and discard any error the sink returns.
pub async fn emit_best_effort<S>(sink: &S, event: GatewayEvent)
where
    S: TelemetrySink + ?Sized,
{
    let _ = sink.emit(event).await;
}

/// A no-op telemetry sink that discards all events. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    type SinkError = std::convert::Infallible;

    async fn emit(&self, _event: GatewayEvent) -> Result<(), Self::SinkError> {
        Ok(())
    }
}

/// A telemetry sink that re-emits events through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    type SinkError = std::convert::Infallible;

    async fn emit(&self, event: GatewayEvent) -> Result<(), Self::SinkError> {
        tracing::info!(event = %event, "gateway_event");
        Ok(())
    }
}

/// A telemetry sink that stores events in a bounded in-memory ring buffer.
///
/// Useful in tests and admin/debug endpoints that want to inspect recent
/// gateway activity without wiring a real observability backend.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GatewayEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: usize::MAX,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    type SinkError = std::convert::Infallible;

    async fn emit(&self, event: GatewayEvent) -> Result<(), Self::SinkError> {
        let mut guard = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Ok(())
    }
}

/// A streaming telemetry sink that broadcasts events to multiple subscribers.
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: Arc<tokio::sync::broadcast::Sender<GatewayEvent>>,
    dropped: Arc<AtomicU64>,
    last_drop_ns: Arc<AtomicU64>,
}

impl StreamingSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            dropped: Arc::new(AtomicU64::new(0)),
            last_drop_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_drop(&self) -> Option<SystemTime> {
        match self.last_drop_ns.load(Ordering::Relaxed) {
            0 => None,
            ns => UNIX_EPOCH.checked_add(Duration::from_nanos(ns)),
        }
    }
}

#[async_trait]
impl TelemetrySink for StreamingSink {
    type SinkError = std::convert::Infallible;

    async fn emit(&self, event: GatewayEvent) -> Result<(), Self::SinkError> {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.last_drop_ns.store(
                SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64,
                Ordering::Relaxed,
            );
        }
        Ok(())
    }
}

/// Error produced when composing two sinks and at least one of them fails.
#[derive(Debug)]
pub struct ComposedSinkError(Box<dyn std::error::Error + Send + Sync>);

impl std::fmt::Display for ComposedSinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "telemetry sink error: {}", self.0)
    }
}

impl std::error::Error for ComposedSinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.0)
    }
}

/// Forwards every event to both inner sinks concurrently.
#[derive(Clone)]
pub struct MulticastSink<A, B> {
    sink_a: A,
    sink_b: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(sink_a: A, sink_b: B) -> Self {
        Self { sink_a, sink_b }
    }
}

#[async_trait]
impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: TelemetrySink + Send + Sync,
    A::SinkError: Send + Sync,
    B: TelemetrySink + Send + Sync,
    B::SinkError: Send + Sync,
{
    type SinkError = ComposedSinkError;

    async fn emit(&self, event: GatewayEvent) -> Result<(), Self::SinkError> {
        let (res_a, res_b) =
            tokio::join!(self.sink_a.emit(event.clone()), self.sink_b.emit(event));
        res_a.map_err(|e| ComposedSinkError(Box::new(e)))?;
        res_b.map_err(|e| ComposedSinkError(Box::new(e)))?;
        Ok(())
    }
}

/// Tries the primary sink first, falling back to the secondary on error.
#[derive(Clone)]
pub struct FallbackSink<A, B> {
    primary: A,
    fallback: B,
}

impl<A, B> FallbackSink<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<A, B> TelemetrySink for FallbackSink<A, B>
where
    A: TelemetrySink + Send + Sync,
    A::SinkError: Send + Sync,
    B: TelemetrySink + Send + Sync,
    B::SinkError: Send + Sync,
{
    type SinkError = ComposedSinkError;

    async fn emit(&self, event: GatewayEvent) -> Result<(), Self::SinkError> {
        match self.primary.emit(event.clone()).await {
            Ok(()) => Ok(()),
            Err(_) => self.fallback.emit(event).await.map_err(|e| ComposedSinkError(Box::new(e))),
        }
    }
}
