use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use postbox_core::app::{PostboxProcessor, ProcessingConfig};
use postbox_core::domain::{Method, Request, Response, Status};
use postbox_core::impls::{InMemoryPostbox, TokioExecutionContext, TracingEventSink};
use postbox_core::ports::{IdGenerator, RequestHandler, SystemClock, UlidGenerator};

#[derive(Debug, Serialize, Deserialize)]
struct ShipOrder {
    order_id: u32,
    quantity: u32,
}

/// 下流サービスのつもり：数量 0 の注文は 400 で拒否する
struct ToyDownstream {
    delivered: AtomicU32,
}

impl ToyDownstream {
    fn new() -> Self {
        Self {
            delivered: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RequestHandler for ToyDownstream {
    async fn handle(&self, request: &Request) -> Response {
        let order: ShipOrder = match serde_json::from_str(&request.body) {
            Ok(order) => order,
            Err(e) => {
                return Response::new(Status::BAD_REQUEST).with_body(format!("json decode: {e}"));
            }
        };

        if order.quantity == 0 {
            warn!(order_id = order.order_id, "downstream rejected order");
            return Response::new(Status::BAD_REQUEST).with_body("quantity must be positive");
        }

        let n = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        info!(order_id = order.order_id, delivered = n, "downstream accepted order");
        Response::new(Status::ACCEPTED)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定と postbox を用意
    let config = ProcessingConfig::from_env()?;
    let postbox = InMemoryPostbox::new();
    let ids = UlidGenerator::new(SystemClock);

    // (B) request を投入（最後の 1 件は少し先に予約）
    let now = Utc::now();
    let orders = [(1, 3), (2, 0), (3, 1), (4, 7)];
    for (order_id, quantity) in orders {
        let request = Request::json(
            Method::Post,
            "/shipments",
            &ShipOrder { order_id, quantity },
        )?;
        let process_at = if order_id == 4 {
            now + chrono::Duration::milliseconds(300)
        } else {
            now
        };
        let request_id = ids.generate_request_id();
        postbox.store(request_id, request, process_at).await;
        info!(%request_id, order_id, "stored request");
    }

    // (C) processor を起動
    let context = Arc::new(TokioExecutionContext::new());
    let processor = PostboxProcessor::builder(
        Arc::new(postbox.clone()),
        Arc::new(ToyDownstream::new()),
    )
    .config(config)
    .events(Arc::new(TracingEventSink))
    .context(context.clone())
    .build()?;
    let processor = Arc::new(processor);
    processor.start();

    // (D) 全件片付くまでポーリング（上限あり）
    let deadline = Instant::now() + Duration::from_secs(30);
    while !postbox.counts().await.is_drained() {
        if Instant::now() >= deadline {
            warn!("gave up waiting for the postbox to drain");
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    // (E) graceful shutdown
    processor.stop();
    context.join().await;

    let counts = postbox.counts().await;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
