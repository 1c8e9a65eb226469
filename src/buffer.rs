//! Holding buffer between subscription delivery and batched reads
//!
//! The subscription side pushes into a bounded queue and waits when it is
//! full, which propagates backpressure to the NATS client. The read side
//! drains up to `count` messages, racing each receive against the read
//! deadline and cancellation.
//!
//! # Test Reference
//! - Test: `buffer::tests`

use crate::message::{Message, Offset, ReadRequest};
use bytes::Bytes;
use chrono::Utc;
use flume::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default capacity of the holding buffer
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// A received message waiting to be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub payload: Bytes,
    pub read_offset: String,
    pub id: String,
}

impl BufferedMessage {
    /// Wrap a payload with a fresh identifier used as both read offset and id
    pub fn new(payload: Bytes) -> Self {
        let read_offset = Uuid::new_v4().to_string();
        Self {
            payload,
            id: read_offset.clone(),
            read_offset,
        }
    }

    fn into_message(self) -> Message {
        Message {
            value: self.payload,
            offset: Offset::with_default_partition(self.read_offset),
            event_time: Utc::now(),
            id: self.id,
        }
    }
}

/// Fixed-capacity concurrent queue of received messages
#[derive(Debug)]
pub struct MessageBuffer {
    tx: Sender<BufferedMessage>,
    rx: Receiver<BufferedMessage>,
    capacity: usize,
}

/// Producer handle, owned by the subscription delivery task
#[derive(Debug, Clone)]
pub struct BufferProducer {
    tx: Sender<BufferedMessage>,
}

impl BufferProducer {
    /// Enqueue a message, waiting while the buffer is full
    ///
    /// Returns `false` if the buffer no longer exists.
    pub async fn push(&self, message: BufferedMessage) -> bool {
        self.tx.send_async(message).await.is_ok()
    }
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx, capacity }
    }

    pub fn producer(&self) -> BufferProducer {
        BufferProducer {
            tx: self.tx.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drain up to `request.count` messages into `output`
    ///
    /// Returns once `count` messages were read, the timeout elapsed, the
    /// request was cancelled or `shutdown` fired, whichever comes first. Ending
    /// without data is not an error. Returns the number of messages appended.
    pub async fn read_into(
        &self,
        request: &ReadRequest,
        shutdown: &CancellationToken,
        output: &mut Vec<Message>,
    ) -> usize {
        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);
        let cancel = request.cancel.clone().unwrap_or_default();

        let mut read = 0;
        while read < request.count {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = cancel.cancelled() => break,
                received = self.rx.recv_async() => match received {
                    Ok(message) => {
                        output.push(message.into_message());
                        read += 1;
                    }
                    Err(_) => break,
                },
                _ = &mut deadline => break,
            }
        }
        read
    }
}
