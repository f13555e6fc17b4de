//! `fetchgate` dispatches HTTP requests through a priority admission queue,
//! with per-attempt timeouts, retries and caller cancellation layered over a
//! fetch-style transport.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use fetchgate::prelude::{CancelSignal, HttpClient, Priority, RequestOptions};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::builder()
//!         .api_url_prefix("https://api.example.com/v1")
//!         .max_concurrent(4)
//!         .timeout(Duration::from_secs(5))
//!         .try_build()?;
//!
//!     let signal = CancelSignal::new();
//!     let user: User = client
//!         .get(
//!             "/users/1",
//!             RequestOptions::new()
//!                 .priority(Priority::High)
//!                 .retry_on_fail(true)
//!                 .retries(2)
//!                 .signal(signal.clone()),
//!         )
//!         .await?;
//!
//!     println!("user {} is {}", user.id, user.name);
//!     Ok(())
//! }
//! ```
//!
//! # Request flow
//!
//! request interceptors, then admission (queue slot), then the retry loop of
//! timeout-bound transport calls, then response interceptors. The admission
//! slot is held until the response interceptors finish.

mod auth;
mod client;
mod config;
mod error;
mod extensions;
mod interceptors;
mod metrics;
mod observe;
mod pipeline;
mod queue;
mod request;
mod response;
mod retry;
mod signal;
mod timeout;
mod transport;
mod util;

pub use crate::auth::{ContextualTokenSource, ExecutionContext, StaticTokenSource, TokenSource};
pub use crate::client::{HttpClient, HttpClientBuilder};
pub use crate::config::{API_URL_ENV, ClientConfig, LOG_TRAFFIC_ENV};
pub use crate::error::{BoxError, Error, ErrorCode, InterceptorPhase, TransportErrorKind};
pub use crate::extensions::{
    AttemptTimeout, Clock, ConstantAttemptTimeout, LinearAttemptTimeout, SystemClock,
};
pub use crate::interceptors::{AuthInterceptor, StatusCheckInterceptor, TrafficLogInterceptor};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::observe::Observer;
pub use crate::pipeline::{Interceptor, InterceptorChain};
pub use crate::queue::{AdmissionError, AdmissionPermit, AdmissionQueue, Priority, QueueSnapshot};
pub use crate::request::{RequestContext, RequestOptions};
pub use crate::response::{HttpResponse, ResponseContext};
pub use crate::retry::{
    Backoff, RetryController, RetryDecision, RetryOutcome, RetryPolicy, RetryState,
};
pub use crate::signal::{AbortSource, CancelSignal, EffectiveSignal, SignalState};
pub use crate::timeout::call_with_timeout;
#[cfg(feature = "hyper-transport")]
pub use crate::transport::HyperTransport;
pub use crate::transport::{Transport, TransportError, TransportFn, TransportFuture, transport_fn};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Backoff, CancelSignal, ClientConfig, Error, ErrorCode, HttpClient, HttpResponse,
        Interceptor, Priority, RequestContext, RequestOptions, ResponseContext, Result,
        RetryPolicy, TokenSource, Transport, TransportError,
    };
}
