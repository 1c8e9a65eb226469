//! Types exchanged with the consuming runtime

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Environment variable holding the replica index of this process
pub const REPLICA_ENV_VAR: &str = "NUMAFLOW_REPLICA";

/// Sentinel returned by `pending` when the backlog length is unknown
pub const PENDING_NOT_AVAILABLE: i64 = -1;

/// Partition every offset of this source belongs to
///
/// The source is single-partition; the partition is identified by the replica
/// index so that replicas sharing a queue group report distinct partitions.
pub fn default_partition() -> i32 {
    static PARTITION: OnceLock<i32> = OnceLock::new();
    *PARTITION.get_or_init(|| partition_from(std::env::var(REPLICA_ENV_VAR).ok().as_deref()))
}

fn partition_from(replica: Option<&str>) -> i32 {
    replica.and_then(|r| r.trim().parse().ok()).unwrap_or(0)
}

/// Delivery handle of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Offset {
    /// Opaque read-offset identifier
    pub offset: Bytes,

    /// Partition the offset belongs to
    pub partition_id: i32,
}

impl Offset {
    /// Offset tagged with the default partition
    pub fn with_default_partition(offset: impl Into<Bytes>) -> Self {
        Self {
            offset: offset.into(),
            partition_id: default_partition(),
        }
    }
}

/// Message handed to the runtime by a read
#[derive(Debug, Clone)]
pub struct Message {
    /// Raw payload
    pub value: Bytes,

    /// Delivery handle
    pub offset: Offset,

    /// Time the message was handed over, not the publish time
    pub event_time: DateTime<Utc>,

    /// Message id, equal to the read offset
    pub id: String,
}

/// Bounds of a single read
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Maximum number of messages to return
    pub count: usize,

    /// Maximum time to wait for messages
    pub timeout: Duration,

    /// Caller-level cancellation, ends the read early like the timeout
    pub cancel: Option<CancellationToken>,
}

impl ReadRequest {
    pub fn new(count: usize, timeout: Duration) -> Self {
        Self {
            count,
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
