//! Per-topic dispatch.
//!
//! Each topic has its own bounded queue so that a slow consumer on one
//! topic never delays another. The queue is drained by a single task per
//! topic, which invokes the registered listener serially, so per-topic
//! FIFO order is preserved end to end.

use crate::metrics;
use crate::GossipListener;
use concord_messages::{GossipHeader, Topic};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Queue depth per topic. Overload shows up as backpressure on the
/// sending peer's connection, not as unbounded memory growth here.
pub const TOPIC_QUEUE_CAPACITY: usize = 10;

struct IncomingMessage {
    header: GossipHeader,
    payloads: Vec<Vec<u8>>,
}

struct TopicQueue {
    tx: mpsc::Sender<IncomingMessage>,
    /// Held until a listener registers, then moved into the consumer task.
    rx: Mutex<Option<mpsc::Receiver<IncomingMessage>>>,
}

/// Routes incoming messages onto per-topic queues.
pub struct Dispatcher {
    topics: HashMap<Topic, TopicQueue>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(shutdown: CancellationToken) -> Self {
        let mut topics = HashMap::new();
        for topic in Topic::ALL {
            let (tx, rx) = mpsc::channel(TOPIC_QUEUE_CAPACITY);
            topics.insert(
                topic,
                TopicQueue {
                    tx,
                    rx: Mutex::new(Some(rx)),
                },
            );
        }
        Self { topics, shutdown }
    }

    /// Enqueue a message for its topic. Waits when the topic queue is full,
    /// which backpressures the calling connection task.
    pub async fn dispatch(&self, header: GossipHeader, payloads: Vec<Vec<u8>>) {
        let topic = header.topic;
        let queue = self
            .topics
            .get(&topic)
            .expect("every topic has a queue");
        if queue
            .tx
            .send(IncomingMessage { header, payloads })
            .await
            .is_err()
        {
            metrics::get().dispatch_failures.inc();
            warn!(topic = topic.name(), "topic queue closed, message dropped");
        }
    }

    /// Attach `listener` to `topic` and start the topic's consumer task.
    ///
    /// Panics if a listener was already registered for the topic; topics
    /// have exactly one owning service.
    pub fn register_listener(&self, topic: Topic, listener: Arc<dyn GossipListener>) {
        let queue = self
            .topics
            .get(&topic)
            .expect("every topic has a queue");
        let mut rx = queue
            .rx
            .lock()
            .take()
            .unwrap_or_else(|| panic!("listener already registered for topic {}", topic.name()));
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(topic = topic.name(), "topic consumer shutting down");
                        return;
                    }
                    message = rx.recv() => {
                        let Some(message) = message else { return };
                        listener.on_message(message.header, message.payloads).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use concord_types::VirtualChainId;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<u16>>,
        notify: tokio::sync::Notify,
    }

    #[async_trait]
    impl GossipListener for Recorder {
        async fn on_message(&self, header: GossipHeader, _payloads: Vec<Vec<u8>>) {
            self.seen.lock().push(header.subtype);
            self.notify.notify_one();
        }
    }

    #[tokio::test]
    async fn preserves_per_topic_fifo_order() {
        let dispatcher = Dispatcher::new(CancellationToken::new());
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        });
        dispatcher.register_listener(Topic::BlockSync, recorder.clone());

        for subtype in 0..5u16 {
            let header = GossipHeader::broadcast(Topic::BlockSync, subtype, VirtualChainId(42));
            dispatcher.dispatch(header, vec![]).await;
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while recorder.seen.lock().len() < 5 {
                recorder.notify.notified().await;
            }
        })
        .await
        .expect("all messages consumed");

        assert_eq!(*recorder.seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    #[should_panic(expected = "listener already registered")]
    async fn second_listener_for_a_topic_panics() {
        let dispatcher = Dispatcher::new(CancellationToken::new());
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        });
        dispatcher.register_listener(Topic::LeanHelix, recorder.clone());
        dispatcher.register_listener(Topic::LeanHelix, recorder);
    }
}
