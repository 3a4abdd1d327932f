//! Request/reply over the message bus.
//!
//! Startup is two-phase: every operation the client will call must be registered with
//! [`RpcClient::subscribe_to_response_of`] before [`RpcClient::connect`] starts the reply
//! consumer. Replies are matched to callers through a pending table keyed by correlation id;
//! each entry resolves at most once and is gone after its deadline.

use crate::application_port::*;
use crate::domain_model::*;
use crate::server::{EventConsumer, EventHandler, EventPublisher, HandleOutcome};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingRequest {
    sender: oneshot::Sender<ReplyEnvelope>,
    deadline: Instant,
    operation: String,
    created_at: Instant,
}

type PendingTable = DashMap<CorrelationId, PendingRequest>;

/// Removes the pending entry when the call finishes for any reason, including the caller
/// dropping the future.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

#[derive(Default)]
struct Registry {
    operations: BTreeSet<String>,
    connected: bool,
}

pub struct RpcClient {
    publisher: Arc<dyn EventPublisher>,
    consumer: Arc<dyn EventConsumer>,
    group_id: String,
    registry: Mutex<Registry>,
    pending: Arc<PendingTable>,
    consumer_handle: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
    cancel: CancellationToken,
}

impl RpcClient {
    /// `cancel` must be the token the consumer was built with; `shutdown` fires it.
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        consumer: Arc<dyn EventConsumer>,
        group_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            publisher,
            consumer,
            group_id: group_id.into(),
            registry: Mutex::new(Registry::default()),
            pending: Arc::new(DashMap::new()),
            consumer_handle: Mutex::new(None),
            cancel,
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        // the registry holds plain data; a poisoned lock is still consistent
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register interest in the reply channel of `operation`. Only allowed before `connect`.
    pub fn subscribe_to_response_of(&self, operation: &str) -> Result<(), TransportError> {
        let mut registry = self.registry();
        if registry.connected {
            return Err(TransportError::AlreadyConnected);
        }
        registry.operations.insert(operation.to_owned());
        Ok(())
    }

    /// Start consuming every registered reply channel. Resolves once the consumer is
    /// subscribed, or fails with `BrokerUnavailable`.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let topics: Vec<String> = {
            let registry = self.registry();
            if registry.connected {
                return Err(TransportError::AlreadyConnected);
            }
            registry.operations.iter().map(|op| reply_channel_of(op)).collect()
        };

        let handler: Arc<dyn EventHandler> = Arc::new(ReplyRouter {
            pending: self.pending.clone(),
        });
        let consumer = self.consumer.clone();
        let group_id = self.group_id.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let run_topics = topics.clone();
        let handle = tokio::spawn(async move {
            let topic_refs: Vec<&str> = run_topics.iter().map(String::as_str).collect();
            consumer.run(&group_id, &topic_refs, handler, ready_tx).await
        });

        if ready_rx.await.is_err() {
            let reason = match handle.await {
                Ok(Err(e)) => format!("{e:#}"),
                Ok(Ok(())) => "reply consumer stopped before subscribing".to_owned(),
                Err(e) => e.to_string(),
            };
            tracing::error!(%reason, "bus connect failed");
            return Err(TransportError::BrokerUnavailable(reason));
        }

        self.registry().connected = true;
        if let Ok(mut lock) = self.consumer_handle.lock() {
            *lock = Some(handle);
        }
        tracing::info!(group = %self.group_id, reply_channels = topics.len(), "rpc client connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.registry().connected
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn ensure_routable(&self, operation: &str) -> Result<(), TransportError> {
        let registry = self.registry();
        if !registry.operations.contains(operation) {
            return Err(TransportError::NotSubscribed(operation.to_owned()));
        }
        if !registry.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    pub async fn call(
        &self,
        operation: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ReplyEnvelope, TransportError> {
        self.ensure_routable(operation)?;

        let envelope = RequestEnvelope::new(operation, payload);
        let correlation_id = envelope.correlation_id;
        let bytes =
            serde_json::to_vec(&envelope).map_err(|e| TransportError::Codec(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let deadline = now + timeout;
        self.pending.insert(
            correlation_id,
            PendingRequest {
                sender: tx,
                deadline,
                operation: operation.to_owned(),
                created_at: now,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            correlation_id,
        };

        let domain = domain_of(operation);
        let timed_out = || {
            tracing::warn!(
                %correlation_id,
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "rpc call timed out"
            );
            TransportError::Timeout(domain.to_owned())
        };

        let key = correlation_id.0.to_string();
        match tokio::time::timeout_at(
            deadline,
            self.publisher.publish(operation, key.as_bytes(), &bytes),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(%correlation_id, operation, error = %e, "publish failed");
                return Err(TransportError::BrokerUnavailable(format!("{e:#}")));
            }
            Err(_) => return Err(timed_out()),
        }
        tracing::debug!(%correlation_id, operation, "rpc request published");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // the sender is only dropped without a reply when the entry expired
            Ok(Err(_)) | Err(_) => Err(timed_out()),
        }
    }

    /// Stop the reply consumer and wait for it. Pending callers run into their deadlines.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = match self.consumer_handle.lock() {
            Ok(mut lock) => lock.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let r = handle.await;
            tracing::info!("rpc reply consumer stopped: {:?}", r);
        }
    }
}

#[async_trait::async_trait]
impl RpcCaller for RpcClient {
    async fn call(
        &self,
        operation: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ReplyEnvelope, TransportError> {
        RpcClient::call(self, operation, payload, timeout).await
    }
}

/// Consumes reply channels and completes the matching pending request.
struct ReplyRouter {
    pending: Arc<PendingTable>,
}

#[async_trait::async_trait]
impl EventHandler for ReplyRouter {
    async fn handle(&self, topic: &str, payload: &[u8]) -> anyhow::Result<HandleOutcome> {
        let reply: ReplyEnvelope = match serde_json::from_slice(payload) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(topic, error = %e, "malformed reply skipped");
                return Ok(HandleOutcome::SkipCommit);
            }
        };
        let Some(correlation_id) = reply.correlation_id else {
            tracing::warn!(topic, "reply without correlation id skipped");
            return Ok(HandleOutcome::SkipCommit);
        };

        let now = Instant::now();
        match self
            .pending
            .remove_if(&correlation_id, |_, request| request.deadline > now)
        {
            Some((_, request)) => {
                let elapsed_ms = now.duration_since(request.created_at).as_millis() as u64;
                if request.sender.send(reply).is_err() {
                    tracing::debug!(%correlation_id, "caller gone before reply");
                } else {
                    tracing::debug!(
                        %correlation_id,
                        operation = %request.operation,
                        elapsed_ms,
                        "rpc reply delivered"
                    );
                }
            }
            None => {
                tracing::debug!(
                    %correlation_id,
                    topic,
                    "reply for unknown, duplicate or expired correlation id dropped"
                );
            }
        }
        Ok(HandleOutcome::Commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::MemoryBus;
    use serde_json::json;

    /// Stand-in domain service: records requests and, unless `silent`, replies `times` times.
    struct Responder {
        bus: Arc<MemoryBus>,
        silent: bool,
        times: usize,
        seen: Mutex<Vec<RequestEnvelope>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for Responder {
        async fn handle(&self, _topic: &str, payload: &[u8]) -> anyhow::Result<HandleOutcome> {
            let request: RequestEnvelope = serde_json::from_slice(payload)?;
            self.seen.lock().unwrap().push(request.clone());
            if !self.silent {
                for n in 0..self.times {
                    let reply = ReplyEnvelope::ok(json!({ "echo": request.payload, "n": n }))
                        .correlated(request.correlation_id);
                    self.bus
                        .publish(&request.reply_channel, b"", &serde_json::to_vec(&reply)?)
                        .await?;
                }
            }
            Ok(HandleOutcome::Commit)
        }
    }

    async fn responder(
        bus: &Arc<MemoryBus>,
        operation: &str,
        silent: bool,
        times: usize,
        cancel: &CancellationToken,
    ) -> Arc<Responder> {
        let responder = Arc::new(Responder {
            bus: bus.clone(),
            silent,
            times,
            seen: Mutex::new(Vec::new()),
        });
        let consumer = bus.consumer(cancel.clone());
        let handler: Arc<dyn EventHandler> = responder.clone();
        let operation = operation.to_owned();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(async move {
            consumer
                .run("course-service", &[&operation], handler, ready_tx)
                .await
        });
        ready_rx.await.unwrap();
        responder
    }

    async fn connected_client(bus: &Arc<MemoryBus>, cancel: &CancellationToken) -> RpcClient {
        let client = RpcClient::new(
            bus.clone(),
            Arc::new(bus.consumer(cancel.clone())),
            "gateway-test",
            cancel.clone(),
        );
        client.subscribe_to_response_of("course.get").unwrap();
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn reply_resolves_the_matching_call() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        responder(&bus, "course.get", false, 1, &cancel).await;
        let client = connected_client(&bus, &cancel).await;

        let reply = client
            .call("course.get", json!({ "id": "x" }), DEFAULT_RPC_TIMEOUT)
            .await
            .unwrap();

        assert!(reply.success);
        assert_eq!(reply.data.unwrap()["echo"], json!({ "id": "x" }));
        assert_eq!(client.pending_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn duplicate_reply_is_discarded() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        responder(&bus, "course.get", false, 2, &cancel).await;
        let client = connected_client(&bus, &cancel).await;

        let reply = client
            .call("course.get", json!({}), DEFAULT_RPC_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(reply.data.unwrap()["n"], 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.pending_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn calling_before_connect_or_registration_fails() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let client = RpcClient::new(
            bus.clone(),
            Arc::new(bus.consumer(cancel.clone())),
            "gateway-test",
            cancel.clone(),
        );
        client.subscribe_to_response_of("course.get").unwrap();

        assert_eq!(
            client.call("course.get", json!({}), DEFAULT_RPC_TIMEOUT).await,
            Err(TransportError::NotConnected)
        );

        client.connect().await.unwrap();
        assert_eq!(
            client.call("user.get", json!({}), DEFAULT_RPC_TIMEOUT).await,
            Err(TransportError::NotSubscribed("user.get".into()))
        );
        assert_eq!(
            client.subscribe_to_response_of("user.get"),
            Err(TransportError::AlreadyConnected)
        );
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_service_times_out_at_the_deadline_not_before() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        responder(&bus, "course.get", true, 0, &cancel).await;
        let client = Arc::new(connected_client(&bus, &cancel).await);

        let started = Instant::now();
        let call = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call("course.get", json!({ "id": "x" }), Duration::from_millis(30_000))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(29_999)).await;
        assert!(!call.is_finished());
        assert_eq!(client.pending_count(), 1);

        let result = call.await.unwrap();
        assert_eq!(result, Err(TransportError::Timeout("course".into())));
        assert!(started.elapsed() >= Duration::from_millis(30_000));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Course service timeout"
        );
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_has_no_effect() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let service = responder(&bus, "course.get", true, 0, &cancel).await;
        let client = connected_client(&bus, &cancel).await;

        let result = client
            .call("course.get", json!({}), Duration::from_millis(500))
            .await;
        assert_eq!(result, Err(TransportError::Timeout("course".into())));

        let request = service.seen.lock().unwrap()[0].clone();
        let late = ReplyEnvelope::ok(json!("too late")).correlated(request.correlation_id);
        bus.publish(
            &request.reply_channel,
            b"",
            &serde_json::to_vec(&late).unwrap(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(client.pending_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn dropped_caller_leaves_no_pending_entry() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        responder(&bus, "course.get", true, 0, &cancel).await;
        let client = connected_client(&bus, &cancel).await;

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            client.call("course.get", json!({}), DEFAULT_RPC_TIMEOUT),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(client.pending_count(), 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn broker_failures_are_not_timeouts() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let client = connected_client(&bus, &cancel).await;

        bus.set_available(false);
        let result = client.call("course.get", json!({}), DEFAULT_RPC_TIMEOUT).await;
        assert!(matches!(result, Err(TransportError::BrokerUnavailable(_))));
        assert_eq!(client.pending_count(), 0);

        let offline = RpcClient::new(
            bus.clone(),
            Arc::new(bus.consumer(cancel.clone())),
            "gateway-offline",
            cancel.clone(),
        );
        offline.subscribe_to_response_of("course.get").unwrap();
        assert!(matches!(
            offline.connect().await,
            Err(TransportError::BrokerUnavailable(_))
        ));
        assert!(!offline.is_connected());
        cancel.cancel();
    }
}
