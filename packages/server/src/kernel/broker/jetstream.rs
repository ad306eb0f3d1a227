use anyhow::Result;
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::info;

use super::{Acknowledger, BaseBroker, Delivery, DeliveryStream};

/// Stream holding every dispatch event.
pub const STREAM_NAME: &str = "DISPATCH_EVENTS";
pub const STREAM_SUBJECTS: &str = "dispatch.>";

const REDELIVERY_BASE: Duration = Duration::from_secs(1);
const REDELIVERY_CAP: Duration = Duration::from_secs(30);

/// Backoff before redelivering a nacked message: doubles per attempt, capped.
fn redelivery_delay(attempt: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    REDELIVERY_BASE
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(REDELIVERY_CAP)
}

/// NATS JetStream broker: one stream, one durable pull consumer per queue.
pub struct JetStreamBroker {
    context: jetstream::Context,
    max_deliver: i64,
}

impl JetStreamBroker {
    /// Ensure the stream exists and return a broker bound to it.
    pub async fn connect(client: async_nats::Client, max_deliver: u32) -> Result<Self> {
        let context = jetstream::new(client);
        context
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![STREAM_SUBJECTS.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("failed to create stream {}: {}", STREAM_NAME, e))?;

        info!(stream = STREAM_NAME, "JetStream stream ready");
        Ok(Self {
            context,
            max_deliver: max_deliver as i64,
        })
    }
}

#[async_trait]
impl BaseBroker for JetStreamBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        // Second await waits for the stream's persistence ack
        self.context
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| anyhow::anyhow!("publish to {} failed: {}", subject, e))?
            .await
            .map_err(|e| anyhow::anyhow!("publish ack for {} failed: {}", subject, e))?;
        Ok(())
    }

    async fn subscribe(&self, queue: &str, subject: &str) -> Result<DeliveryStream> {
        let stream = self
            .context
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| anyhow::anyhow!("stream {} unavailable: {}", STREAM_NAME, e))?;

        let consumer = stream
            .get_or_create_consumer(
                queue,
                pull::Config {
                    durable_name: Some(queue.to_string()),
                    filter_subject: subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: self.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow::anyhow!("consumer {} unavailable: {}", queue, e))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| anyhow::anyhow!("consumer {} stream failed: {}", queue, e))?;

        let deliveries = messages.map(|result| {
            let message = result.map_err(|e| anyhow::anyhow!("delivery failed: {}", e))?;
            let attempt = message
                .info()
                .map(|info| info.delivered.max(1) as u64)
                .map_err(|e| anyhow::anyhow!("malformed delivery metadata: {}", e))?;
            let subject = message.subject.to_string();
            let payload = message.payload.clone();
            Ok(Delivery::new(
                subject,
                payload,
                attempt,
                Box::new(JetStreamAcker { message, attempt }),
            ))
        });

        Ok(Box::pin(deliveries))
    }
}

struct JetStreamAcker {
    message: jetstream::Message,
    attempt: u64,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow::anyhow!("ack failed: {}", e))
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        let delay = redelivery_delay(self.attempt);
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| anyhow::anyhow!("nak failed: {}", e))
    }

    async fn terminate(self: Box<Self>) -> Result<()> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| anyhow::anyhow!("term failed: {}", e))
    }
}
