//! NATS source
//!
//! Bridges a NATS queue subscription to pull-based batched reads. A delivery
//! task drains the subscription into a bounded [`MessageBuffer`]; reads drain
//! the buffer under a count and time budget.
//!
//! Delivery is at-most-once: a message is gone from the broker's point of view
//! as soon as the subscription receives it, so acknowledgements carry no
//! meaning and buffered messages are lost if the process stops.
//!
//! # Test Reference
//! - Test: `source::tests`
//! - Test: `tests/integration_tests.rs`

use crate::buffer::{BufferProducer, BufferedMessage, MessageBuffer, DEFAULT_BUFFER_SIZE};
use crate::config::NatsConfig;
use crate::connection;
use crate::error::{NatsError, Result};
use crate::message::{default_partition, Message, Offset, ReadRequest, PENDING_NOT_AVAILABLE};
use crate::secrets::{SecretReader, VolumeSecretReader};
use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use std::time::Duration;
use tracing::{Instrument, Span};

/// Upper bound on each teardown step that talks to the server
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pull interface invoked by the consuming runtime
#[async_trait]
pub trait Source: Send + Sync {
    /// Append up to `request.count` messages to `output`, waiting at most
    /// `request.timeout`
    async fn read(&self, request: &ReadRequest, output: &mut Vec<Message>);

    /// Acknowledge previously read offsets
    async fn ack(&self, offsets: Vec<Offset>);

    /// Number of messages not yet read, `-1` when unknown
    async fn pending(&self) -> i64;

    /// Partitions served by this source
    async fn partitions(&self) -> Vec<i32>;
}

/// Lifecycle state of a [`NatsSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Subscribed,
    Closed,
}

/// Builder for [`NatsSource`]
pub struct NatsSourceBuilder {
    config: NatsConfig,
    buffer_size: usize,
    secrets: Arc<dyn SecretReader>,
    span: Option<Span>,
}

impl NatsSourceBuilder {
    pub fn new(config: NatsConfig) -> Self {
        Self {
            config,
            buffer_size: DEFAULT_BUFFER_SIZE,
            secrets: Arc::new(VolumeSecretReader::default()),
            span: None,
        }
    }

    /// Capacity of the holding buffer
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Where TLS and credential secrets are resolved from
    pub fn secret_reader(mut self, reader: impl SecretReader + 'static) -> Self {
        self.secrets = Arc::new(reader);
        self
    }

    /// Span all source logs are recorded in
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Connect, subscribe and start delivering into the buffer
    pub async fn build(self) -> Result<NatsSource> {
        self.config.validate()?;
        if self.buffer_size == 0 {
            return Err(NatsError::Config(
                "buffer size must be greater than zero".to_string(),
            ));
        }

        let span = self.span.unwrap_or_else(|| {
            tracing::info_span!(
                "nats_source",
                subject = %self.config.subject,
                queue = %self.config.queue
            )
        });

        let client = connection::connect(&self.config, self.secrets.as_ref(), &span).await?;
        let subscriber = subscribe(&client, &self.config)
            .instrument(span.clone())
            .await;
        let subscriber = match subscriber {
            Ok(subscriber) => subscriber,
            Err(e) => {
                close_client(client).instrument(span.clone()).await;
                return Err(e);
            }
        };

        let buffer = MessageBuffer::new(self.buffer_size);
        let shutdown = CancellationToken::new();
        let delivery = tokio::spawn(
            deliver(subscriber, buffer.producer(), shutdown.clone()).instrument(span.clone()),
        );
        span.in_scope(|| tracing::info!(buffer_size = self.buffer_size, "NATS source started"));

        Ok(NatsSource {
            buffer,
            client: Mutex::new(Some(client)),
            delivery: Mutex::new(Some(delivery)),
            shutdown,
            span,
        })
    }
}

/// Source reading from a NATS queue subscription
pub struct NatsSource {
    buffer: MessageBuffer,
    client: Mutex<Option<Client>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    span: Span,
}

impl NatsSource {
    pub fn builder(config: NatsConfig) -> NatsSourceBuilder {
        NatsSourceBuilder::new(config)
    }

    /// Build a source with default buffer size, secret root and span
    pub async fn new(config: NatsConfig) -> Result<Self> {
        NatsSourceBuilder::new(config).build().await
    }

    pub fn state(&self) -> SourceState {
        if self.shutdown.is_cancelled() {
            SourceState::Closed
        } else {
            SourceState::Subscribed
        }
    }

    /// Messages received but not read yet
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Stop delivery, unsubscribe and close the connection
    ///
    /// In-flight reads return what they collected so far. Unsubscribe and
    /// flush failures are logged only. Call once; later calls do nothing.
    pub async fn close(&self) -> Result<()> {
        async {
            if self.shutdown.is_cancelled() {
                tracing::warn!("NATS source already closed");
                return;
            }
            tracing::info!("Shutting down NATS source");
            self.shutdown.cancel();

            if let Some(delivery) = self.delivery.lock().await.take() {
                if let Err(e) = delivery.await {
                    tracing::error!(error = %e, "NATS delivery task failed");
                }
            }
            if let Some(client) = self.client.lock().await.take() {
                close_client(client).await;
            }
            tracing::info!(dropped = self.buffer.len(), "NATS source shutdown");
        }
        .instrument(self.span.clone())
        .await;
        Ok(())
    }
}

impl Drop for NatsSource {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Source for NatsSource {
    async fn read(&self, request: &ReadRequest, output: &mut Vec<Message>) {
        let read = self.buffer.read_into(request, &self.shutdown, output).await;
        self.span
            .in_scope(|| tracing::trace!(read, requested = request.count, "Read batch"));
    }

    async fn ack(&self, offsets: Vec<Offset>) {
        self.span
            .in_scope(|| tracing::trace!(count = offsets.len(), "Ack is a no-op"));
    }

    async fn pending(&self) -> i64 {
        PENDING_NOT_AVAILABLE
    }

    async fn partitions(&self) -> Vec<i32> {
        vec![default_partition()]
    }
}

async fn subscribe(client: &Client, config: &NatsConfig) -> Result<Subscriber> {
    tracing::info!(
        subject = %config.subject,
        queue = %config.queue,
        "Subscribing to subject with queue"
    );
    client
        .queue_subscribe(config.subject.clone(), config.queue.clone())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to queue subscribe");
            NatsError::Subscription(format!("failed to QueueSubscribe nats messages, {}", e))
        })
}

/// Move messages from the subscription into the buffer until shutdown
///
/// Waits on a full buffer, which stalls the subscription and lets the NATS
/// client apply its own slow-consumer handling.
async fn deliver(
    mut subscriber: Subscriber,
    producer: BufferProducer,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = subscriber.next() => match next {
                Some(msg) => {
                    let message = BufferedMessage::new(msg.payload);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        accepted = producer.push(message) => {
                            if !accepted {
                                tracing::warn!("Holding buffer gone, stopping delivery");
                                break;
                            }
                        }
                    }
                }
                None => {
                    tracing::warn!("NATS subscription ended");
                    break;
                }
            },
        }
    }

    match tokio::time::timeout(CLOSE_TIMEOUT, subscriber.unsubscribe()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Failed to unsubscribe nats subscription"),
        Err(_) => tracing::warn!(
            timeout = ?CLOSE_TIMEOUT,
            "Timed out unsubscribing nats subscription"
        ),
    }
}

/// Flush pending commands and drop the connection
///
/// The flush is bounded by [`CLOSE_TIMEOUT`] since it never completes while
/// the client is reconnecting.
async fn close_client(client: Client) {
    match tokio::time::timeout(CLOSE_TIMEOUT, client.flush()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to flush NATS connection"),
        Err(_) => tracing::warn!(
            timeout = ?CLOSE_TIMEOUT,
            "Timed out flushing NATS connection, closing anyway"
        ),
    }
    drop(client);
}

#[cfg(test)]
impl NatsSource {
    /// Source with a buffer but no connection, fed through the returned producer
    pub(crate) fn detached(buffer_size: usize) -> (Self, BufferProducer) {
        let buffer = MessageBuffer::new(buffer_size);
        let producer = buffer.producer();
        let source = NatsSource {
            buffer,
            client: Mutex::new(None),
            delivery: Mutex::new(None),
            shutdown: CancellationToken::new(),
            span: Span::none(),
        };
        (source, producer)
    }
}
