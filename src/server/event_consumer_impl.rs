use crate::server::{EventConsumer, EventHandler, HandleOutcome, ReadySignal};
use futures_util::StreamExt;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const METADATA_ATTEMPTS: usize = 25;

/// Where a consumer starts reading once it is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartAt {
    /// Group subscription: committed offsets, `earliest` for a new group.
    Committed,
    /// Every partition pinned to its high watermark before `ready` fires.
    Tail,
}

pub struct KafkaConsumer {
    bootstrap_server: String,
    client_id: String,
    start: StartAt,
    cancellation_token: CancellationToken,
}

impl KafkaConsumer {
    pub fn new(
        bootstrap_server: &str,
        client_id: &str,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            bootstrap_server: bootstrap_server.to_string(),
            client_id: client_id.to_string(),
            start: StartAt::Committed,
            cancellation_token,
        }
    }

    /// Skip the backlog. Reply consumers only care about replies to their own requests.
    ///
    /// Partitions are assigned directly instead of waiting for a group rebalance, so a reply
    /// published right after `ready` is never behind the starting offset.
    pub fn from_latest(mut self) -> Self {
        self.start = StartAt::Tail;
        self
    }

    async fn ensure_topics(bootstrap: &str, topics: &[&str]) -> anyhow::Result<()> {
        let admin: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .create()?;

        let new_topics: Vec<_> = topics
            .iter()
            .map(|t| NewTopic::new(t, 1, TopicReplication::Fixed(1)))
            .collect();

        // already-existing topics come back as per-topic errors, which is fine
        let _ = admin
            .create_topics(&new_topics, &AdminOptions::new())
            .await?;

        Ok(())
    }

    /// Partition ids of `topic`. Freshly created topics take a moment to show up in metadata.
    async fn partitions_of(consumer: &StreamConsumer, topic: &str) -> anyhow::Result<Vec<i32>> {
        for _ in 0..METADATA_ATTEMPTS {
            let metadata = consumer.fetch_metadata(Some(topic), METADATA_TIMEOUT)?;
            let ids: Vec<i32> = metadata
                .topics()
                .iter()
                .filter(|t| t.name() == topic && t.error().is_none())
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect();
            if !ids.is_empty() {
                return Ok(ids);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Err(anyhow::anyhow!("no partitions for topic {topic}"))
    }

    async fn assign_tail(consumer: &StreamConsumer, topics: &[&str]) -> anyhow::Result<()> {
        let mut watermarks = Vec::new();
        for topic in topics {
            for partition in Self::partitions_of(consumer, topic).await? {
                let (_, high) = consumer.fetch_watermarks(topic, partition, METADATA_TIMEOUT)?;
                watermarks.push((*topic, partition, high));
            }
        }
        consumer.assign(&tail_assignment(&watermarks)?)?;
        Ok(())
    }
}

/// Assignment that starts each `(topic, partition)` at the given high watermark.
fn tail_assignment(watermarks: &[(&str, i32, i64)]) -> KafkaResult<TopicPartitionList> {
    let mut tpl = TopicPartitionList::new();
    for (topic, partition, high) in watermarks {
        tpl.add_partition_offset(topic, *partition, Offset::Offset(*high))?;
    }
    Ok(tpl)
}

#[async_trait::async_trait]
impl EventConsumer for KafkaConsumer {
    async fn run(
        &self,
        consumer_group_id: &str,
        topics: &[&str],
        handler: Arc<dyn EventHandler>,
        ready: ReadySignal,
    ) -> anyhow::Result<()> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_server)
            .set("client.id", &self.client_id)
            .set("group.id", consumer_group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        // fails fast when the broker is unreachable
        consumer
            .fetch_metadata(None, METADATA_TIMEOUT)
            .map_err(|e| anyhow::anyhow!("broker unreachable: {e}"))?;

        Self::ensure_topics(&self.bootstrap_server, topics).await?;
        match self.start {
            StartAt::Committed => consumer.subscribe(topics)?,
            StartAt::Tail => Self::assign_tail(&consumer, topics).await?,
        }
        let _ = ready.send(());
        tracing::info!(
            group = consumer_group_id,
            ?topics,
            start = ?self.start,
            "Kafka consumer ready"
        );

        let mut stream = consumer.stream();

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("Kafka consumer shutting down...");
                    break;
                }
                msg = stream.next() => msg,
            };

            let Some(message) = result else {
                tracing::error!("Kafka consumer stream terminated");
                break;
            };

            match message {
                Err(e) => {
                    // broker hiccup
                    tracing::warn!(error = ?e, "consumer poll error");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok(m) => {
                    let topic = m.topic();
                    let payload = m.payload().unwrap_or(&[]);

                    match handler.handle(topic, payload).await {
                        Ok(HandleOutcome::Commit | HandleOutcome::SkipCommit) => {
                            if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                                tracing::warn!(error = ?e, "commit failed but ignored");
                            }
                        }
                        Err(e) => {
                            // no redelivery; the offset moves past the message
                            tracing::error!(error = ?e, topic, "handler error; message skipped");
                            if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                                tracing::warn!(error = ?e, "commit failed but ignored");
                            }
                        }
                    }
                }
            }
        }

        match self.start {
            StartAt::Committed => consumer.unsubscribe(),
            StartAt::Tail => {
                if let Err(e) = consumer.unassign() {
                    tracing::warn!(error = ?e, "unassign failed");
                }
            }
        }

        Ok(())
    }
}
