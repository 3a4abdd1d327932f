use std::sync::Arc;
use tokio::sync::oneshot;

#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> anyhow::Result<()>;
}

/// Fired once the consumer's starting position is fixed, so every message published
/// afterwards is delivered to it.
pub type ReadySignal = oneshot::Sender<()>;

#[async_trait::async_trait]
pub trait EventConsumer: Send + Sync {
    /// Runs until cancelled. Returns early with an error if the broker cannot be reached,
    /// in which case `ready` is dropped without firing.
    async fn run(
        &self,
        consumer_group_id: &str,
        topics: &[&str],
        handler: Arc<dyn EventHandler>,
        ready: ReadySignal,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Commit,
    SkipCommit,
}

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]) -> anyhow::Result<HandleOutcome>;
}
