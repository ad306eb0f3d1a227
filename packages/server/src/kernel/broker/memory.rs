use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

use super::{subject_matches, Acknowledger, BaseBroker, Delivery, DeliveryStream};

/// A message accepted by `publish`.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// A message that exhausted its deliveries or was terminated.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub subject: String,
    pub payload: Bytes,
    pub attempts: u64,
}

#[derive(Debug, Clone)]
struct Pending {
    subject: String,
    payload: Bytes,
    attempt: u64,
}

struct Queue {
    filter: String,
    sender: mpsc::UnboundedSender<Pending>,
}

/// Messages kept in the log and in the dead-letter list, oldest dropped first.
const DEFAULT_RETENTION: usize = 10_000;

struct Shared {
    log: RwLock<VecDeque<PublishedMessage>>,
    queues: RwLock<HashMap<String, Queue>>,
    dead_letters: RwLock<VecDeque<DeadLetter>>,
    max_deliver: u64,
    retention: usize,
}

fn push_bounded<T>(list: &RwLock<VecDeque<T>>, item: T, limit: usize) {
    let mut list = list.write().unwrap_or_else(|e| e.into_inner());
    if list.len() >= limit {
        list.pop_front();
    }
    list.push_back(item);
}

impl Shared {
    fn enqueue(&self, queue: &str, pending: Pending) {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        if let Some(q) = queues.get(queue) {
            if q.sender.send(pending).is_err() {
                warn!(queue, "Queue receiver dropped, message lost");
            }
        }
    }

    fn dead_letter(&self, queue: &str, pending: Pending) {
        push_bounded(
            &self.dead_letters,
            DeadLetter {
                queue: queue.to_string(),
                subject: pending.subject,
                payload: pending.payload,
                attempts: pending.attempt,
            },
            self.retention,
        );
    }
}

/// Broker with JetStream-like semantics held entirely in memory.
///
/// The most recent published messages are retained in a log, like a stream
/// with a message limit and discard-old. A newly declared queue replays the
/// retained entries matching its filter, as a durable consumer with
/// deliver-all would. A nacked delivery is requeued until `max_deliver`
/// attempts, then moved to the dead-letter list.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new(max_deliver: u32) -> Self {
        Self::with_retention(max_deliver, DEFAULT_RETENTION)
    }

    pub fn with_retention(max_deliver: u32, retention: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                log: RwLock::new(VecDeque::new()),
                queues: RwLock::new(HashMap::new()),
                dead_letters: RwLock::new(VecDeque::new()),
                max_deliver: max_deliver.max(1) as u64,
                retention: retention.max(1),
            }),
        }
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.shared
            .log
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published_messages()
            .into_iter()
            .filter(|m| m.subject == subject)
            .collect()
    }

    pub fn publish_count_for(&self, subject: &str) -> usize {
        self.messages_for_subject(subject).len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared
            .dead_letters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl BaseBroker for InMemoryBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        push_bounded(
            &self.shared.log,
            PublishedMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
            },
            self.shared.retention,
        );

        let queues = self.shared.queues.read().unwrap_or_else(|e| e.into_inner());
        for (name, queue) in queues.iter() {
            if subject_matches(&queue.filter, subject) {
                let pending = Pending {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                    attempt: 1,
                };
                if queue.sender.send(pending).is_err() {
                    warn!(queue = %name, "Queue receiver dropped, message lost");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str, subject: &str) -> Result<DeliveryStream> {
        let (sender, receiver) = mpsc::unbounded_channel();

        {
            let mut queues = self.shared.queues.write().unwrap_or_else(|e| e.into_inner());
            let is_new = !queues.contains_key(queue);
            if is_new {
                let log = self.shared.log.read().unwrap_or_else(|e| e.into_inner());
                for message in log.iter().filter(|m| subject_matches(subject, &m.subject)) {
                    let _ = sender.send(Pending {
                        subject: message.subject.clone(),
                        payload: message.payload.clone(),
                        attempt: 1,
                    });
                }
            }
            queues.insert(
                queue.to_string(),
                Queue {
                    filter: subject.to_string(),
                    sender,
                },
            );
        }

        let shared = self.shared.clone();
        let queue = queue.to_string();
        let deliveries = UnboundedReceiverStream::new(receiver).map(move |pending| {
            Ok(Delivery::new(
                pending.subject.clone(),
                pending.payload.clone(),
                pending.attempt,
                Box::new(MemoryAcker {
                    shared: shared.clone(),
                    queue: queue.clone(),
                    pending,
                }),
            ))
        });

        Ok(Box::pin(deliveries))
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    pending: Pending,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        let MemoryAcker {
            shared,
            queue,
            mut pending,
        } = *self;

        if pending.attempt >= shared.max_deliver {
            shared.dead_letter(&queue, pending);
        } else {
            pending.attempt += 1;
            shared.enqueue(&queue, pending);
        }
        Ok(())
    }

    async fn terminate(self: Box<Self>) -> Result<()> {
        let MemoryAcker {
            shared,
            queue,
            pending,
        } = *self;
        shared.dead_letter(&queue, pending);
        Ok(())
    }
}
