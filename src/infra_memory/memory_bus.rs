//! In-process stand-in for the broker. Topics fan out to every consumer group; inside one
//! group a single live subscriber receives each message, as with Kafka.

use crate::server::{EventConsumer, EventHandler, EventPublisher, HandleOutcome, ReadySignal};
use anyhow::anyhow;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;

type Delivery = (String, Vec<u8>);

struct Subscriber {
    group: String,
    tx: UnboundedSender<Delivery>,
}

pub struct MemoryBus {
    topics: DashMap<String, Vec<Subscriber>>,
    available: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            available: AtomicBool::new(true),
        })
    }

    /// Simulate the broker going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn consumer(self: &Arc<Self>, cancellation_token: CancellationToken) -> MemoryConsumer {
        MemoryConsumer {
            bus: self.clone(),
            cancellation_token,
        }
    }
}

#[async_trait::async_trait]
impl EventPublisher for MemoryBus {
    async fn publish(&self, topic: &str, _key: &[u8], payload: &[u8]) -> anyhow::Result<()> {
        if !self.is_available() {
            return Err(anyhow!("memory bus unavailable"));
        }

        let Some(mut subs) = self.topics.get_mut(topic) else {
            tracing::trace!(topic, "no subscribers, message dropped");
            return Ok(());
        };
        subs.retain(|s| !s.tx.is_closed());

        let mut served = HashSet::new();
        for sub in subs.iter() {
            if served.insert(sub.group.as_str()) {
                let _ = sub.tx.send((topic.to_owned(), payload.to_vec()));
            }
        }
        Ok(())
    }
}

pub struct MemoryConsumer {
    bus: Arc<MemoryBus>,
    cancellation_token: CancellationToken,
}

#[async_trait::async_trait]
impl EventConsumer for MemoryConsumer {
    async fn run(
        &self,
        consumer_group_id: &str,
        topics: &[&str],
        handler: Arc<dyn EventHandler>,
        ready: ReadySignal,
    ) -> anyhow::Result<()> {
        if !self.bus.is_available() {
            return Err(anyhow!("memory bus unavailable"));
        }

        let (tx, mut rx) = unbounded_channel::<Delivery>();
        for topic in topics {
            self.bus
                .topics
                .entry((*topic).to_owned())
                .or_default()
                .push(Subscriber {
                    group: consumer_group_id.to_owned(),
                    tx: tx.clone(),
                });
        }
        drop(tx);
        let _ = ready.send(());

        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                d = rx.recv() => d,
            };
            let Some((topic, payload)) = delivery else {
                break;
            };

            match handler.handle(&topic, &payload).await {
                Ok(HandleOutcome::Commit | HandleOutcome::SkipCommit) => {}
                Err(e) => tracing::error!(error = ?e, topic, "handler error; message skipped"),
            }
        }

        // closing the receiver unregisters this subscriber on the next publish
        rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, topic: &str, payload: &[u8]) -> anyhow::Result<HandleOutcome> {
            self.seen
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.to_vec()));
            Ok(HandleOutcome::Commit)
        }
    }

    async fn spawn_consumer(
        bus: &Arc<MemoryBus>,
        group: &str,
        topic: &str,
        cancel: CancellationToken,
    ) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        let consumer = bus.consumer(cancel);
        let handler: Arc<dyn EventHandler> = recorder.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let group = group.to_owned();
        let topic = topic.to_owned();
        tokio::spawn(async move {
            consumer.run(&group, &[&topic], handler, ready_tx).await
        });
        ready_rx.await.unwrap();
        recorder
    }

    #[tokio::test]
    async fn one_delivery_per_group() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();

        let a1 = spawn_consumer(&bus, "a", "t", cancel.clone()).await;
        let a2 = spawn_consumer(&bus, "a", "t", cancel.clone()).await;
        let b = spawn_consumer(&bus, "b", "t", cancel.clone()).await;

        bus.publish("t", b"k", b"hello").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let in_a = a1.seen.lock().unwrap().len() + a2.seen.lock().unwrap().len();
        assert_eq!(in_a, 1);
        assert_eq!(b.seen.lock().unwrap().len(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn unavailable_bus_refuses_publish_and_subscribe() {
        let bus = MemoryBus::new();
        bus.set_available(false);

        assert!(bus.publish("t", b"k", b"x").await.is_err());

        let consumer = bus.consumer(CancellationToken::new());
        let (ready_tx, ready_rx) = oneshot::channel();
        let handler: Arc<dyn EventHandler> = Arc::new(Recorder::default());
        assert!(consumer.run("g", &["t"], handler, ready_tx).await.is_err());
        assert!(ready_rx.await.is_err());
    }
}
