//! Durable broker abstraction.
//!
//! Topic-style publish, one durable queue per consumer, at-least-once
//! delivery with explicit acknowledgement. `JetStreamBroker` is the
//! production implementation; `InMemoryBroker` has the same redelivery and
//! dead-letter behaviour for tests and memory-mode runs.

mod jetstream;
mod memory;

pub use jetstream::JetStreamBroker;
pub use memory::{DeadLetter, InMemoryBroker, PublishedMessage};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Settles one delivery. Exactly one of the methods is called per delivery.
#[async_trait]
pub trait Acknowledger: Send {
    /// Processed; never redeliver.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Failed; redeliver (subject to the queue's max-deliver policy).
    async fn nack(self: Box<Self>) -> Result<()>;

    /// Poison message; stop redelivering.
    async fn terminate(self: Box<Self>) -> Result<()>;
}

/// One message handed to a consumer.
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
    /// 1 on first delivery.
    pub attempt: u64,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        subject: impl Into<String>,
        payload: Bytes,
        attempt: u64,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            attempt,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self) -> Result<()> {
        self.acker.nack().await
    }

    pub async fn terminate(self) -> Result<()> {
        self.acker.terminate().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("attempt", &self.attempt)
            .field("len", &self.payload.len())
            .finish()
    }
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

#[async_trait]
pub trait BaseBroker: Send + Sync {
    /// Publish durably. Returns once the broker has accepted the message.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Attach to (creating if needed) the durable queue `queue` filtered to `subject`.
    async fn subscribe(&self, queue: &str, subject: &str) -> Result<DeliveryStream>;
}

/// NATS-style subject match: `*` matches one token, `>` the remainder.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
