//! Service side of request/reply: consumes the request topics of an [`RpcHandler`] and
//! publishes one correlated reply per request on its reply channel.

use crate::application_port::*;
use crate::domain_model::*;
use crate::server::{EventConsumer, EventHandler, EventPublisher, HandleOutcome, ReadySignal};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct RpcServerConfig {
    pub max_inflight_requests: usize,
    pub max_handler_time: Duration,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            max_inflight_requests: 256,
            max_handler_time: Duration::from_secs(30),
        }
    }
}

pub struct RpcServer {
    handler: Arc<dyn RpcHandler>,
    publisher: Arc<dyn EventPublisher>,
    consumer: Arc<dyn EventConsumer>,
    group_id: String,
    config: RpcServerConfig,
    worker_sem: Arc<Semaphore>,
}

impl RpcServer {
    pub fn new(
        handler: Arc<dyn RpcHandler>,
        publisher: Arc<dyn EventPublisher>,
        consumer: Arc<dyn EventConsumer>,
        group_id: impl Into<String>,
        config: RpcServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler,
            publisher,
            consumer,
            group_id: group_id.into(),
            worker_sem: Arc::new(Semaphore::new(config.max_inflight_requests)),
            config,
        })
    }

    /// Consume until the consumer's cancellation token fires.
    pub async fn run(self: &Arc<Self>, ready: ReadySignal) -> anyhow::Result<()> {
        let operations = self.handler.operations();
        let topics: Vec<&str> = operations.iter().map(String::as_str).collect();
        tracing::info!(group = %self.group_id, ?operations, "rpc server starting");

        let handler: Arc<dyn EventHandler> = self.clone();
        self.consumer
            .run(&self.group_id, &topics, handler, ready)
            .await
    }

    /// `run` in the background. Resolves once the request topics are subscribed.
    pub async fn spawn(self: &Arc<Self>) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let server = self.clone();
        let handle = tokio::spawn(async move { server.run(ready_tx).await });

        if ready_rx.await.is_err() {
            return match handle.await {
                Ok(Err(e)) => Err(e.context("rpc server failed to subscribe")),
                Ok(Ok(())) => Err(anyhow::anyhow!("rpc server stopped before subscribing")),
                Err(e) => Err(e.into()),
            };
        }
        Ok(handle)
    }
}

async fn serve(
    handler: Arc<dyn RpcHandler>,
    publisher: Arc<dyn EventPublisher>,
    max_handler_time: Duration,
    request: RequestEnvelope,
) {
    let correlation_id = request.correlation_id;
    let operation = request.operation.clone();

    // a panicking handler still owes the caller a failed envelope
    let guarded = AssertUnwindSafe(handler.handle(&request.operation, request.payload))
        .catch_unwind()
        .map(|result| {
            result.unwrap_or_else(|_| {
                tracing::error!(%correlation_id, %operation, "handler panicked");
                Err(DomainError::new("Internal server error"))
            })
        });
    let outcome = tokio::time::timeout(max_handler_time, guarded).await;

    let reply = match outcome {
        Ok(Ok(data)) => ReplyEnvelope::ok(data),
        Ok(Err(e)) => {
            tracing::debug!(%correlation_id, %operation, error = %e, "handler failed");
            e.into()
        }
        Err(_) => {
            // the caller's own deadline answers for us
            tracing::warn!(%correlation_id, %operation, "handler exceeded its time budget");
            return;
        }
    }
    .correlated(correlation_id);

    let bytes = match serde_json::to_vec(&reply) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(%correlation_id, error = %e, "reply encode failed");
            return;
        }
    };
    let key = correlation_id.to_string();
    if let Err(e) = publisher
        .publish(&request.reply_channel, key.as_bytes(), &bytes)
        .await
    {
        tracing::error!(%correlation_id, %operation, error = %e, "reply publish failed");
    }
}

#[async_trait::async_trait]
impl EventHandler for RpcServer {
    async fn handle(&self, topic: &str, payload: &[u8]) -> anyhow::Result<HandleOutcome> {
        let request: RequestEnvelope = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(topic, error = %e, "malformed request skipped");
                return Ok(HandleOutcome::SkipCommit);
            }
        };

        // at most `max_inflight_requests` handlers run at once; the consumer waits for a slot
        let permit = self.worker_sem.clone().acquire_owned().await?;

        let handler = self.handler.clone();
        let publisher = self.publisher.clone();
        let max_handler_time = self.config.max_handler_time;
        tokio::spawn(async move {
            let _permit_guard = permit;
            serve(handler, publisher, max_handler_time, request).await;
        });

        Ok(HandleOutcome::Commit)
    }
}
