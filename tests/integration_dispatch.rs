use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fetchgate::{
    CancelSignal, Error, ErrorCode, HttpClient, HttpClientBuilder, InterceptorPhase,
    LinearAttemptTimeout, Observer, Priority, QueueSnapshot, RequestOptions, RetryDecision,
    StaticTokenSource, Transport, TransportError, TransportErrorKind, TransportFuture,
};
use http::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use http::{Method, Request, Response};
use serde::Deserialize;
use tokio::time::{Instant, sleep};

#[derive(Clone)]
enum Step {
    Respond {
        status: u16,
        retry_after: Option<u64>,
        body: &'static str,
        delay: Duration,
    },
    WaitFor(CancelSignal),
    Hang,
    Fail(TransportErrorKind),
}

impl Step {
    fn status(status: u16) -> Self {
        Self::Respond {
            status,
            retry_after: None,
            body: "{}",
            delay: Duration::ZERO,
        }
    }

    fn status_after(status: u16, delay: Duration) -> Self {
        Self::Respond {
            status,
            retry_after: None,
            body: "{}",
            delay,
        }
    }

    fn retry_after(status: u16, seconds: u64) -> Self {
        Self::Respond {
            status,
            retry_after: Some(seconds),
            body: "{}",
            delay: Duration::ZERO,
        }
    }

    fn json(status: u16, body: &'static str) -> Self {
        Self::Respond {
            status,
            retry_after: None,
            body,
            delay: Duration::ZERO,
        }
    }
}

struct Recorded {
    path: String,
    headers: HeaderMap,
    at: Instant,
}

struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    requests: Mutex<Vec<Recorded>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct InFlight {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ScriptedTransport {
    fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn always(step: Step) -> Arc<Self> {
        Self::new(Vec::new(), step)
    }

    fn calls(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    fn paths(&self) -> Vec<String> {
        lock_unpoisoned(&self.requests)
            .iter()
            .map(|request| request.path.clone())
            .collect()
    }

    fn gaps(&self) -> Vec<Duration> {
        let requests = lock_unpoisoned(&self.requests);
        requests
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }

    fn header_of(&self, index: usize, name: &str) -> Option<String> {
        lock_unpoisoned(&self.requests)
            .get(index)
            .and_then(|request| request.headers.get(name))
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: Request<Bytes>) -> TransportFuture {
        let step = lock_unpoisoned(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let echo = request.headers().get("x-test").cloned();
        lock_unpoisoned(&self.requests).push(Recorded {
            path: request.uri().path().to_owned(),
            headers: request.headers().clone(),
            at: Instant::now(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight {
            in_flight: Arc::clone(&self.in_flight),
        };

        Box::pin(async move {
            let _guard = guard;
            match step {
                Step::Respond {
                    status,
                    retry_after,
                    body,
                    delay,
                } => {
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    let mut builder = Response::builder().status(status);
                    if let Some(seconds) = retry_after {
                        builder = builder.header(RETRY_AFTER, seconds.to_string());
                    }
                    if let Some(echo) = echo {
                        builder = builder.header("x-test", echo);
                    }
                    Ok(builder
                        .body(Bytes::from_static(body.as_bytes()))
                        .expect("build response"))
                }
                Step::WaitFor(gate) => {
                    gate.cancelled().await;
                    Ok(Response::builder()
                        .status(200)
                        .body(Bytes::from_static(b"{}"))
                        .expect("build response"))
                }
                Step::Hang => std::future::pending().await,
                Step::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
            }
        })
    }
}

fn builder(transport: &Arc<ScriptedTransport>) -> HttpClientBuilder {
    HttpClient::builder()
        .api_url_prefix("https://api.example.com")
        .transport(transport.clone())
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn ten_requests_never_exceed_six_in_flight() {
    let transport = ScriptedTransport::always(Step::status_after(200, Duration::from_millis(50)));
    let client = builder(&transport).max_concurrent(6).build();

    let mut handles = Vec::new();
    for index in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .send(Method::GET, format!("/items/{index}"), RequestOptions::new())
                .await
        }));
    }
    for handle in handles {
        let response = handle.await.expect("join").expect("send");
        assert_eq!(response.status(), 200);
    }

    assert_eq!(transport.calls(), 10);
    assert_eq!(transport.peak(), 6);
    let queue = client.queue_snapshot();
    assert_eq!(queue.peak_active, 6);
    assert_eq!(queue.active, 0);
    assert_eq!(queue.pending, 0);
    assert_eq!(queue.dispatched, 10);
}

#[tokio::test(start_paused = true)]
async fn freed_slot_goes_to_highest_priority_first() {
    let gate = CancelSignal::new();
    let transport = ScriptedTransport::new(vec![Step::WaitFor(gate.clone())], Step::status(200));
    let client = builder(&transport).max_concurrent(1).build();

    let mut handles = Vec::new();
    {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .send(Method::GET, "/blocker", RequestOptions::new())
                .await
        }));
    }
    wait_until(|| transport.calls() == 1).await;

    for (index, (path, priority)) in [
        ("/low", Priority::Low),
        ("/normal-1", Priority::Normal),
        ("/high", Priority::High),
        ("/normal-2", Priority::Normal),
    ]
    .into_iter()
    .enumerate()
    {
        let client_for_task = client.clone();
        handles.push(tokio::spawn(async move {
            client_for_task
                .send(Method::GET, path, RequestOptions::new().priority(priority))
                .await
        }));
        wait_until(|| client.queue_snapshot().pending == index + 1).await;
    }

    gate.cancel();
    for handle in handles {
        handle.await.expect("join").expect("send");
    }
    assert_eq!(
        transport.paths(),
        vec!["/blocker", "/high", "/normal-1", "/normal-2", "/low"]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_queued_never_reaches_transport() {
    let gate = CancelSignal::new();
    let transport = ScriptedTransport::new(vec![Step::WaitFor(gate.clone())], Step::status(200));
    let client = builder(&transport).max_concurrent(1).build();

    let blocker = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send(Method::GET, "/blocker", RequestOptions::new())
                .await
        })
    };
    wait_until(|| transport.calls() == 1).await;

    let signal = CancelSignal::new();
    let queued = {
        let client = client.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            client
                .send(Method::GET, "/queued", RequestOptions::new().signal(signal))
                .await
        })
    };
    wait_until(|| client.queue_snapshot().pending == 1).await;

    signal.cancel();
    let error = queued.await.expect("join").expect_err("cancelled while queued");
    assert!(error.is_cancelled());
    assert_eq!(client.queue_snapshot().pending, 0);

    gate.cancel();
    blocker.await.expect("join").expect("blocker completes");
    assert_eq!(transport.paths(), vec!["/blocker"]);
    assert_eq!(client.queue_snapshot().dispatched, 1);
    assert_eq!(client.metrics_snapshot().cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_non_success_is_returned_when_raw() {
    let transport = ScriptedTransport::always(Step::status(500));
    let client = builder(&transport)
        .retry_on_fail(true)
        .retries(2)
        .retry_interval(Duration::from_millis(1000))
        .build();

    let started = Instant::now();
    let response = client
        .send(
            Method::GET,
            "/flaky",
            RequestOptions::new().return_raw_response(true),
        )
        .await
        .expect("raw response survives exhaustion");

    assert_eq!(response.status(), 500);
    assert_eq!(transport.calls(), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000));
    assert!(elapsed < Duration::from_millis(2100));
    assert_eq!(client.metrics_snapshot().retries, 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_non_success_fails_status_check() {
    let transport = ScriptedTransport::always(Step::json(503, r#"{"error":"down"}"#));
    let client = builder(&transport)
        .retry_on_fail(true)
        .retries(1)
        .retry_interval(Duration::from_millis(10))
        .build();

    let error = client
        .send(Method::GET, "/down", RequestOptions::new())
        .await
        .expect_err("503 must surface as an error");
    match error {
        Error::HttpStatus {
            status,
            message,
            body,
            ..
        } => {
            assert_eq!(status, 503);
            assert_eq!(message, "service unavailable");
            assert_eq!(body, r#"{"error":"down"}"#);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn success_after_retry_stops_the_loop() {
    let transport = ScriptedTransport::new(
        vec![Step::status(502), Step::json(200, r#"{"ok":true}"#)],
        Step::status(500),
    );
    let client = builder(&transport).retries(3).build();

    let body: serde_json::Value = client
        .get("/eventually", RequestOptions::new().retry_on_fail(true))
        .await
        .expect("second attempt succeeds");
    assert_eq!(body["ok"], true);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_after_overrides_only_the_next_wait() {
    let transport = ScriptedTransport::new(
        vec![
            Step::retry_after(503, 2),
            Step::status(500),
            Step::status(200),
        ],
        Step::status(500),
    );
    let client = builder(&transport)
        .retry_on_fail(true)
        .retries(2)
        .retry_interval(Duration::from_millis(100))
        .build();

    client
        .send(Method::GET, "/busy", RequestOptions::new())
        .await
        .expect("third attempt succeeds");

    let gaps = transport.gaps();
    assert_eq!(gaps.len(), 2);
    assert!(gaps[0] >= Duration::from_millis(2000));
    assert!(gaps[0] < Duration::from_millis(2050));
    assert!(gaps[1] >= Duration::from_millis(100));
    assert!(gaps[1] < Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_settles_immediately() {
    let transport = ScriptedTransport::always(Step::status(500));
    let client = builder(&transport)
        .retry_on_fail(true)
        .retries(3)
        .retry_interval(Duration::from_secs(10))
        .build();
    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = client
        .send(Method::GET, "/flaky", RequestOptions::new().signal(signal))
        .await
        .expect_err("cancelled during backoff");

    assert!(error.is_cancelled());
    assert_eq!(transport.calls(), 1);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn cancellation_in_flight_is_not_a_timeout() {
    let transport = ScriptedTransport::always(Step::Hang);
    let client = builder(&transport).retry_on_fail(true).build();
    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let error = client
        .send(Method::GET, "/slow", RequestOptions::new().signal(signal))
        .await
        .expect_err("cancelled in flight");
    assert!(error.is_cancelled());
    assert!(!error.is_timeout());
    assert_eq!(transport.calls(), 1);

    let metrics = client.metrics_snapshot();
    assert_eq!(metrics.cancelled, 1);
    assert_eq!(metrics.timeouts, 0);
    assert_eq!(metrics.in_flight, 0);
    assert_eq!(client.queue_snapshot().active, 0);
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_then_raised() {
    let transport = ScriptedTransport::always(Step::Hang);
    let client = builder(&transport)
        .timeout(Duration::from_millis(100))
        .retry_on_fail(true)
        .retries(1)
        .retry_interval(Duration::from_millis(50))
        .build();

    let started = Instant::now();
    let error = client
        .send(Method::GET, "/slow", RequestOptions::new())
        .await
        .expect_err("timeout after retries");
    assert_eq!(error.code(), ErrorCode::Timeout);
    assert_eq!(transport.calls(), 2);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn linear_attempt_timeout_grows_per_attempt() {
    let transport = ScriptedTransport::always(Step::Hang);
    let client = builder(&transport)
        .timeout(Duration::from_millis(100))
        .retry_interval(Duration::from_millis(50))
        .build();

    let started = Instant::now();
    let error = client
        .send(
            Method::GET,
            "/slow",
            RequestOptions::new()
                .retry_on_fail(true)
                .retries(1)
                .attempt_timeout(Arc::new(LinearAttemptTimeout)),
        )
        .await
        .expect_err("timeout after retries");
    assert!(error.is_timeout());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(350));
    assert!(elapsed < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn transport_failures_keep_their_kind() {
    let transport = ScriptedTransport::always(Step::Fail(TransportErrorKind::Connect));
    let client = builder(&transport)
        .retry_on_fail(true)
        .retries(1)
        .retry_interval(Duration::from_millis(10))
        .build();

    let error = client
        .send(Method::GET, "/down", RequestOptions::new())
        .await
        .expect_err("transport failure");
    match error {
        Error::Transport { kind, .. } => assert_eq!(kind, TransportErrorKind::Connect),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.metrics_snapshot().transport_errors, 1);
}

#[tokio::test]
async fn not_found_is_not_retried_by_default() {
    let transport = ScriptedTransport::always(Step::json(404, r#"{"error":"missing"}"#));
    let client = builder(&transport).build();

    let error = client
        .get::<serde_json::Value>("/users/9", RequestOptions::new())
        .await
        .expect_err("404");
    match error {
        Error::HttpStatus {
            status, message, ..
        } => {
            assert_eq!(status, 404);
            assert_eq!(message, "resource not found");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.calls(), 1);

    let raw = client
        .send(
            Method::GET,
            "/users/9",
            RequestOptions::new().return_raw_response(true),
        )
        .await
        .expect("raw 404");
    assert_eq!(raw.status(), 404);
}

#[tokio::test]
async fn interceptors_see_and_edit_both_phases() {
    let transport = ScriptedTransport::always(Step::status(200));
    let client = builder(&transport)
        .request_fn(|context| context.set_header("x-test", "1"))
        .response_fn(|context| {
            let echoed = context.response.headers().get("x-test").cloned();
            if let Some(echoed) = echoed {
                context.response.headers_mut().insert("x-seen", echoed);
            }
            Ok(())
        })
        .build();

    let response = client
        .send(Method::GET, "/echo", RequestOptions::new())
        .await
        .expect("send");
    assert_eq!(transport.header_of(0, "x-test").as_deref(), Some("1"));
    assert_eq!(response.headers()["x-test"], "1");
    assert_eq!(response.headers()["x-seen"], "1");
}

#[tokio::test]
async fn request_interceptor_failure_skips_transport() {
    let transport = ScriptedTransport::always(Step::status(200));
    let client = builder(&transport)
        .request_fn(|_context| {
            Err(Error::interceptor(
                InterceptorPhase::Request,
                "missing session",
            ))
        })
        .build();

    let error = client
        .send(Method::GET, "/me", RequestOptions::new())
        .await
        .expect_err("request stage fails");
    assert_eq!(error.code(), ErrorCode::Interceptor);
    assert_eq!(transport.calls(), 0);
    assert_eq!(client.queue_snapshot().dispatched, 0);
}

#[tokio::test]
async fn response_interceptor_failure_releases_the_slot() {
    let transport = ScriptedTransport::always(Step::status(200));
    let client = builder(&transport)
        .max_concurrent(1)
        .response_fn(|context| {
            if context.request.target == "/bad" {
                return Err(Error::interceptor(InterceptorPhase::Response, "bad payload"));
            }
            Ok(())
        })
        .build();

    for _ in 0..3 {
        let error = client
            .send(Method::GET, "/bad", RequestOptions::new())
            .await
            .expect_err("response stage fails");
        assert_eq!(error.code(), ErrorCode::Interceptor);
        assert_eq!(client.queue_snapshot().active, 0);
    }
    client
        .send(Method::GET, "/good", RequestOptions::new())
        .await
        .expect("slot was released");
    assert_eq!(client.metrics_snapshot().interceptor_errors, 3);
}

#[tokio::test]
async fn auth_header_follows_request_flag() {
    let transport = ScriptedTransport::always(Step::status(200));
    let client = builder(&transport)
        .token_source(Arc::new(StaticTokenSource::new("Bearer session-1")))
        .build();

    client
        .send(Method::GET, "/me", RequestOptions::new())
        .await
        .expect("send");
    client
        .send(
            Method::GET,
            "/public",
            RequestOptions::new().attach_auth_header(false),
        )
        .await
        .expect("send");

    assert_eq!(
        transport.header_of(0, AUTHORIZATION.as_str()).as_deref(),
        Some("Bearer session-1")
    );
    assert_eq!(transport.header_of(1, AUTHORIZATION.as_str()), None);
}

#[tokio::test]
async fn default_headers_are_merged_under_request_headers() {
    let transport = ScriptedTransport::always(Step::status(200));
    let client = builder(&transport)
        .try_default_header("x-client", "fetchgate")
        .expect("header")
        .try_default_header("x-tenant", "default")
        .expect("header")
        .build();

    client
        .send(
            Method::GET,
            "/me",
            RequestOptions::new()
                .header("x-tenant".parse().expect("name"), HeaderValue::from_static("acme")),
        )
        .await
        .expect("send");
    assert_eq!(transport.header_of(0, "x-client").as_deref(), Some("fetchgate"));
    assert_eq!(transport.header_of(0, "x-tenant").as_deref(), Some("acme"));
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
}

#[tokio::test]
async fn put_round_trips_json() {
    let transport = ScriptedTransport::always(Step::json(200, r#"{"id":7,"name":"ada"}"#));
    let client = builder(&transport).build();

    let user: User = client
        .put(
            "/users/7",
            &serde_json::json!({ "name": "ada" }),
            RequestOptions::new(),
        )
        .await
        .expect("put");
    assert_eq!(
        user,
        User {
            id: 7,
            name: "ada".to_owned()
        }
    );
    assert_eq!(
        transport.header_of(0, "content-type").as_deref(),
        Some("application/json")
    );
}

#[derive(Default)]
struct RecordingObserver {
    delays: Mutex<Vec<Duration>>,
    enqueued: AtomicUsize,
    dispatched: AtomicUsize,
}

impl Observer for RecordingObserver {
    fn on_enqueued(&self, _priority: Priority, _queue: &QueueSnapshot) {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    fn on_dispatched(&self, _priority: Priority, _queue: &QueueSnapshot) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    fn on_retry_scheduled(&self, _decision: &RetryDecision, delay: Duration) {
        lock_unpoisoned(&self.delays).push(delay);
    }
}

#[tokio::test(start_paused = true)]
async fn observer_sees_queue_and_retry_events() {
    let transport = ScriptedTransport::new(
        vec![
            Step::retry_after(429, 2),
            Step::status(500),
            Step::status(200),
        ],
        Step::status(500),
    );
    let observer = Arc::new(RecordingObserver::default());
    let client = builder(&transport)
        .retry_on_fail(true)
        .retries(2)
        .retry_interval(Duration::from_millis(100))
        .observer(observer.clone())
        .build();

    client
        .send(Method::GET, "/limited", RequestOptions::new())
        .await
        .expect("third attempt succeeds");

    assert_eq!(observer.enqueued.load(Ordering::SeqCst), 1);
    assert_eq!(observer.dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(
        *lock_unpoisoned(&observer.delays),
        vec![Duration::from_secs(2), Duration::from_millis(100)]
    );
}
