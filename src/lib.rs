#![forbid(unsafe_code)]

//! # provider-gateway
//!
//! A resilient multi-provider gateway for calling out to redundant upstream
//! services (LLM vendors, payment processors, anything with multiple
//! interchangeable backends and API keys). Composes per-key circuit
//! breakers, sliding-window health and quota tracking, and configurable
//! routing strategies into a single autonomous resilience layer.
//!
//! ## Features
//!
//! - **Per-key circuit breakers** with automatic half-open recovery probes
//! - **Sliding-window health tracking** (success rate, latency percentiles)
//! - **RPM/TPM quota tracking** that self-replenishes as the window slides
//! - **Round-robin key rotation** within a provider's key pool
//! - **Provider routing strategies**: priority failover, round robin,
//!   weighted, least latency
//! - **Bounded retries with capped exponential backoff** and automatic
//!   provider failover
//! - **Structured telemetry** via a pluggable event sink, independent of
//!   `tracing` output
//!
//! ## Quick Start
//!
//! ```rust
//! use provider_gateway::{Gateway, ProviderConfig};
//!
//! #[derive(Debug)]
//! struct CallError(String);
//! impl std::fmt::Display for CallError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{}", self.0)
//!     }
//! }
//! impl std::error::Error for CallError {}
//!
//! # #[tokio::main]
//! # async fn main() {
//! let openai = ProviderConfig::builder("openai")
//!     .api_key("sk-primary")
//!     .api_key("sk-secondary")
//!     .priority(10)
//!     .build()
//!     .expect("valid config");
//!
//! let gateway = Gateway::builder().provider(openai).build();
//!
//! let result = gateway
//!     .execute(
//!         |_cfg, key| async move { Ok::<_, CallError>(format!("called with {key}")) },
//!         2048,
//!         None,
//!     )
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

mod backoff;
mod circuit_breaker;
mod clock;
mod error;
mod gateway;
mod health;
mod key_manager;
mod provider;
mod quota;
mod router;
mod sleeper;
pub mod telemetry;
mod timeout;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitState, Transition};
pub use clock::{Clock, MonotonicClock};
pub use error::ResilienceError;
pub use gateway::{AllProvidersExhausted, Gateway, GatewayBuilder, GatewayError, ProviderHealth};
pub use health::{HealthSnapshot, HealthTracker};
pub use key_manager::{KeyManager, KeyState};
pub use provider::{ConfigError, ProviderConfig, ProviderConfigBuilder, ProviderStatus, RoutingStrategy};
pub use quota::QuotaManager;
pub use router::Router;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

pub mod prelude;
