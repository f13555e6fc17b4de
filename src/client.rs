use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info_span, warn};

use crate::Result;
use crate::auth::TokenSource;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::extensions::{AttemptTimeout, Clock, ConstantAttemptTimeout, SystemClock};
use crate::interceptors::{AuthInterceptor, StatusCheckInterceptor, TrafficLogInterceptor};
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::observe::Observer;
use crate::pipeline::{Interceptor, InterceptorChain};
use crate::queue::{AdmissionQueue, Priority, QueueSnapshot};
use crate::request::{RequestContext, RequestOptions};
use crate::response::{HttpResponse, ResponseContext};
use crate::retry::{Backoff, RetryController, RetryPolicy};
use crate::signal::CancelSignal;
use crate::timeout::call_with_timeout;
use crate::transport::Transport;
use crate::util::{
    merge_headers, parse_header_name, parse_header_value, redact_uri_for_logs, resolve_uri,
};

pub struct HttpClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    default_headers: HeaderMap,
    token_source: Option<Arc<dyn TokenSource>>,
    auth_header: Option<HeaderName>,
    request_interceptors: InterceptorChain<RequestContext>,
    response_interceptors: InterceptorChain<ResponseContext>,
    backoff: Backoff,
    attempt_timeout: Arc<dyn AttemptTimeout>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn Observer>>,
}

impl HttpClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            default_headers: HeaderMap::new(),
            token_source: None,
            auth_header: None,
            request_interceptors: InterceptorChain::new(),
            response_interceptors: InterceptorChain::new(),
            backoff: Backoff::Constant,
            attempt_timeout: Arc::new(ConstantAttemptTimeout),
            clock: Arc::new(SystemClock),
            observers: Vec::new(),
        }
    }

    /// Replaces every config-backed option at once.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn api_url_prefix(mut self, api_url_prefix: impl Into<String>) -> Self {
        self.config.api_url_prefix = api_url_prefix.into();
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis().clamp(1, u64::MAX as u128) as u64;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.config.retry_interval_ms = retry_interval.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn retry_on_fail(mut self, enabled: bool) -> Self {
        self.config.retry_on_fail_by_default = enabled;
        self
    }

    pub fn attach_auth_header(mut self, attach: bool) -> Self {
        self.config.attach_auth_header_by_default = attach;
        self
    }

    pub fn return_raw_response(mut self, raw: bool) -> Self {
        self.config.return_raw_response_by_default = raw;
        self
    }

    pub fn log_traffic(mut self, enabled: bool) -> Self {
        self.config.log_traffic = enabled;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn token_source(mut self, token_source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(token_source);
        self
    }

    /// Header the auth token is written to. Defaults to `authorization`.
    pub fn auth_header_name(mut self, header: HeaderName) -> Self {
        self.auth_header = Some(header);
        self
    }

    pub fn request_interceptor<I>(mut self, stage: I) -> Self
    where
        I: Interceptor<RequestContext> + 'static,
    {
        self.request_interceptors.push(stage);
        self
    }

    pub fn request_fn<F>(mut self, stage: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<()> + Send + Sync + 'static,
    {
        self.request_interceptors.use_fn(stage);
        self
    }

    pub fn response_interceptor<I>(mut self, stage: I) -> Self
    where
        I: Interceptor<ResponseContext> + 'static,
    {
        self.response_interceptors.push(stage);
        self
    }

    pub fn response_fn<F>(mut self, stage: F) -> Self
    where
        F: Fn(&mut ResponseContext) -> Result<()> + Send + Sync + 'static,
    {
        self.response_interceptors.use_fn(stage);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn attempt_timeout(mut self, attempt_timeout: Arc<dyn AttemptTimeout>) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn try_build(self) -> Result<HttpClient> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };

        let mut request_chain: InterceptorChain<RequestContext> = InterceptorChain::new();
        if let Some(source) = self.token_source {
            let mut auth = AuthInterceptor::new(source);
            if let Some(header) = self.auth_header {
                auth = auth.header_name(header);
            }
            request_chain.push(auth);
        }
        request_chain.extend(&self.request_interceptors);
        let mut response_chain: InterceptorChain<ResponseContext> = InterceptorChain::new();
        if self.config.log_traffic {
            request_chain.push(TrafficLogInterceptor);
            response_chain.push(TrafficLogInterceptor);
        }
        response_chain.push(StatusCheckInterceptor);
        response_chain.extend(&self.response_interceptors);

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                queue: AdmissionQueue::new(self.config.max_concurrent),
                config: self.config,
                default_headers: self.default_headers,
                transport,
                request_chain,
                response_chain,
                backoff: self.backoff,
                attempt_timeout: self.attempt_timeout,
                clock: self.clock,
                observers: self.observers,
                metrics: ClientMetrics::default(),
            }),
        })
    }

    pub fn build(self) -> HttpClient {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build fetchgate http client: {error}"))
    }
}

#[cfg(feature = "hyper-transport")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::HyperTransport::new()))
}

#[cfg(not(feature = "hyper-transport"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(Error::InvalidConfig {
        message: "no transport configured and the `hyper-transport` feature is disabled"
            .to_owned(),
    })
}

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    default_headers: HeaderMap,
    transport: Arc<dyn Transport>,
    queue: AdmissionQueue,
    request_chain: InterceptorChain<RequestContext>,
    response_chain: InterceptorChain<ResponseContext>,
    backoff: Backoff,
    attempt_timeout: Arc<dyn AttemptTimeout>,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn Observer>>,
    metrics: ClientMetrics,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::builder().config(config).try_build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.inner.queue.snapshot()
    }

    /// Dispatches one request and returns the response after the response
    /// interceptors have run.
    pub async fn send(
        &self,
        method: Method,
        path: impl Into<String>,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let context = RequestContext::from_options(method, path, self.resolve_options(options));
        let span = info_span!(
            "fetchgate.request",
            method = %context.method,
            target = %redact_uri_for_logs(&context.target),
            priority = %context.options.priority
        );
        self.execute(context).instrument(span).await
    }

    /// Sends `body` as JSON (when given) and decodes the response body as `T`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: impl Into<String>,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = match body {
            Some(payload) => options.json(payload)?,
            None => options,
        };
        self.send(method, path, options).await?.json()
    }

    pub async fn get<T>(&self, path: impl Into<String>, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request::<T, ()>(Method::GET, path, None, options)
            .await
    }

    pub async fn post<T, B>(
        &self,
        path: impl Into<String>,
        payload: &B,
        options: RequestOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(payload), options)
            .await
    }

    pub async fn put<T, B>(
        &self,
        path: impl Into<String>,
        payload: &B,
        options: RequestOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(payload), options)
            .await
    }

    pub async fn delete<T>(&self, path: impl Into<String>, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.request::<T, ()>(Method::DELETE, path, None, options)
            .await
    }

    fn resolve_options(&self, mut options: RequestOptions) -> RequestOptions {
        let config = &self.inner.config;
        options.timeout = options.timeout.or(Some(config.timeout()));
        options.retries = options.retries.or(Some(config.retries));
        options.retry_interval = options.retry_interval.or(Some(config.retry_interval()));
        options.retry_on_fail = options.retry_on_fail.or(Some(config.retry_on_fail_by_default));
        options.api_url = options
            .api_url
            .or_else(|| Some(config.api_url_prefix.clone()));
        options.attach_auth_header = options
            .attach_auth_header
            .or(Some(config.attach_auth_header_by_default));
        options.return_raw_response = options
            .return_raw_response
            .or(Some(config.return_raw_response_by_default));
        options
    }

    async fn execute(&self, context: RequestContext) -> Result<HttpResponse> {
        let metrics = &self.inner.metrics;
        metrics.record_request_started();
        let _in_flight = metrics.enter_in_flight();
        let started_at = Instant::now();

        let result = self.execute_pipeline(context).await;
        match &result {
            Ok(response) => debug!(status = response.status().as_u16(), "request completed"),
            Err(error) if error.is_cancelled() => debug!("request cancelled"),
            Err(error) => warn!(code = error.code().as_str(), error = %error, "request failed"),
        }
        metrics.record_request_completed(&result, started_at.elapsed());
        result
    }

    async fn execute_pipeline(&self, mut context: RequestContext) -> Result<HttpResponse> {
        let inner = &self.inner;
        context.headers = merge_headers(&inner.default_headers, &context.headers);
        let context = inner.request_chain.run(context).await?;

        let base_url = context
            .options
            .api_url
            .as_deref()
            .unwrap_or(&inner.config.api_url_prefix);
        let (uri_text, uri) = resolve_uri(base_url, &context.target)?;
        let redacted_uri = redact_uri_for_logs(&uri_text);
        let request = build_request(&context, uri.clone())?;
        let method = context.method.clone();
        let priority = context.options.priority;
        let queue_signal = context.options.signal.clone();

        self.notify_enqueued(priority);
        let admitted = inner
            .queue
            .enqueue(priority, queue_signal.as_ref(), move || async move {
                self.notify_dispatched(priority);
                let response = self.dispatch(request, &context.options).await?;
                let response = HttpResponse::from_transport(response, uri);
                // The slot stays held until the response interceptors finish.
                let response_context = inner
                    .response_chain
                    .run(ResponseContext::new(response, context))
                    .await?;
                Ok::<_, Error>(response_context.into_response())
            })
            .await;

        match admitted {
            Ok(result) => result,
            Err(admission) => Err(admission.into_error(&method, &redacted_uri)),
        }
    }

    async fn dispatch(
        &self,
        request: Request<Bytes>,
        options: &RequestOptions,
    ) -> Result<Response<Bytes>> {
        let inner = &self.inner;
        let config = &inner.config;
        let signal: Option<&CancelSignal> = options.signal.as_ref();
        let timeout = options.timeout.unwrap_or_else(|| config.timeout());
        let attempt_timeout = options
            .attempt_timeout
            .clone()
            .unwrap_or_else(|| Arc::clone(&inner.attempt_timeout));

        if !options
            .retry_on_fail
            .unwrap_or(config.retry_on_fail_by_default)
        {
            let timeout = attempt_timeout.timeout_for_attempt(timeout, 0);
            return call_with_timeout(inner.transport.as_ref(), request, signal, timeout).await;
        }

        let policy = RetryPolicy::new(
            options.retries.unwrap_or(config.retries),
            options
                .retry_interval
                .unwrap_or_else(|| config.retry_interval()),
        )
        .backoff(inner.backoff);
        let outcome = RetryController::new(inner.transport.as_ref(), policy, timeout)
            .attempt_timeout(attempt_timeout)
            .clock(Arc::clone(&inner.clock))
            .observers(&inner.observers)
            .run(&request, signal)
            .await;
        debug!(state = ?outcome.state, attempts = outcome.attempts, "retry loop finished");
        inner
            .metrics
            .record_retries(outcome.attempts.saturating_sub(1) as u64);
        outcome.into_result()
    }

    fn notify_enqueued(&self, priority: Priority) {
        if self.inner.observers.is_empty() {
            return;
        }
        let snapshot = self.inner.queue.snapshot();
        for observer in &self.inner.observers {
            observer.on_enqueued(priority, &snapshot);
        }
    }

    fn notify_dispatched(&self, priority: Priority) {
        if self.inner.observers.is_empty() {
            return;
        }
        let snapshot = self.inner.queue.snapshot();
        for observer in &self.inner.observers {
            observer.on_dispatched(priority, &snapshot);
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpClient")
            .field("config", &self.inner.config)
            .field("queue", &self.inner.queue.snapshot())
            .finish_non_exhaustive()
    }
}

fn build_request(context: &RequestContext, uri: Uri) -> Result<Request<Bytes>> {
    let mut request = Request::builder()
        .method(context.method.clone())
        .uri(uri)
        .body(context.body.clone().unwrap_or_default())
        .map_err(|source| Error::RequestBuild { source })?;
    *request.headers_mut() = context.headers.clone();
    Ok(request)
}
