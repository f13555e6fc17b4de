use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fetchgate::prelude::{HttpClient, Priority, RequestOptions};
use fetchgate::{Observer, QueueSnapshot, TransportError, transport_fn};
use http::{Method, Request, Response};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

struct ConsoleObserver;

impl Observer for ConsoleObserver {
    fn on_enqueued(&self, priority: Priority, queue: &QueueSnapshot) {
        println!(
            "enqueued priority={priority} active={} pending={}",
            queue.active, queue.pending
        );
    }

    fn on_dispatched(&self, priority: Priority, queue: &QueueSnapshot) {
        println!(
            "dispatched priority={priority} active={} pending={}",
            queue.active, queue.pending
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Each call takes 200ms so the queue fills up behind the two slots.
    let transport = transport_fn(|request: Request<Bytes>| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let body = Bytes::from(format!("served {}", request.uri().path()));
        Ok::<_, TransportError>(
            Response::builder()
                .status(200)
                .body(body)
                .unwrap_or_default(),
        )
    });

    let client = HttpClient::builder()
        .api_url_prefix("http://demo.invalid/api")
        .max_concurrent(2)
        .transport(Arc::new(transport))
        .observer(Arc::new(ConsoleObserver))
        .try_build()?;

    let started = Instant::now();
    let mut handles = Vec::new();
    let plan = [
        ("low-1", Priority::Low),
        ("normal-1", Priority::Normal),
        ("normal-2", Priority::Normal),
        ("low-2", Priority::Low),
        ("high-1", Priority::High),
        ("high-2", Priority::High),
    ];

    for (name, priority) in plan {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let result = client
                .send(
                    Method::GET,
                    format!("/{name}"),
                    RequestOptions::new().priority(priority),
                )
                .await;
            (name, result.map(|response| response.text_lossy()))
        }));
        tokio::task::yield_now().await;
    }

    for handle in handles {
        let (name, result) = handle.await?;
        match result {
            Ok(text) => println!("{name}: {text}"),
            Err(error) => println!("{name}: error={error}"),
        }
    }

    let queue = client.queue_snapshot();
    println!(
        "peak_active={} dispatched={} elapsed_ms={}",
        queue.peak_active,
        queue.dispatched,
        started.elapsed().as_millis()
    );
    Ok(())
}
