use std::sync::Arc;
use std::time::Duration;

use fetchgate::prelude::{CancelSignal, HttpClient, RequestOptions};
use fetchgate::{Observer, RetryDecision};
use http::Method;
use tracing_subscriber::EnvFilter;

struct RetryPrinter;

impl Observer for RetryPrinter {
    fn on_retry_scheduled(&self, decision: &RetryDecision, delay: Duration) {
        println!(
            "retry {}/{} uri={} status={:?} after={}ms",
            decision.attempt,
            decision.max_retries,
            decision.uri,
            decision.status.map(|status| status.as_u16()),
            delay.as_millis()
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = HttpClient::builder()
        .api_url_prefix("https://httpbin.org")
        .timeout(Duration::from_secs(5))
        .retry_interval(Duration::from_millis(500))
        .observer(Arc::new(RetryPrinter))
        .try_build()?;

    // 503 on every attempt; the raw response comes back once retries run out.
    let response = client
        .send(
            Method::GET,
            "/status/503",
            RequestOptions::new()
                .retry_on_fail(true)
                .retries(2)
                .return_raw_response(true),
        )
        .await?;
    println!("exhausted with status={}", response.status());

    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    match client
        .send(Method::GET, "/delay/3", RequestOptions::new().signal(signal))
        .await
    {
        Ok(response) => println!("unexpected status={}", response.status()),
        Err(error) if error.is_cancelled() => println!("cancelled: {error}"),
        Err(error) => println!("error={error}"),
    }

    let metrics = client.metrics_snapshot();
    println!(
        "started={} cancelled={} retries={}",
        metrics.requests_started, metrics.cancelled, metrics.retries
    );
    Ok(())
}
