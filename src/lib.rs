//! NATS Source for Pull-Based Stream Processing
//!
//! This crate adapts a NATS subject into a pull-based, batched read interface.
//! Publishers push messages at their own pace; the consuming runtime calls a
//! bounded-time, bounded-count read and receives whatever is available.
//!
//! # Features
//!
//! - **Queue Subscriptions**: Load balancing across source replicas sharing a queue group
//! - **Bounded Buffering**: Fixed-capacity holding buffer with backpressure on delivery
//! - **Batched Reads**: Count- and timeout-bounded reads that never block past their deadline
//! - **TLS**: CA pinning, client certificates and optional verification skip
//! - **Authentication**: Basic (user/password), token or NKey credentials from mounted secrets
//! - **Auto-Reconnect**: Unlimited reconnect attempts with a fixed delay
//!
//! Delivery is at-most-once. Acknowledgements are accepted and ignored, and
//! `pending` always reports `-1` because NATS core subjects have no backlog.
//!
//! # Example
//!
//! ```rust,ignore
//! use nats_source::{NatsConfig, NatsSource, ReadRequest, Source};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NatsConfig::new("nats://localhost:4222", "orders", "order-readers");
//!     let source = NatsSource::builder(config)
//!         .buffer_size(500)
//!         .span(tracing::info_span!("orders_source"))
//!         .build()
//!         .await?;
//!
//!     let mut batch = Vec::new();
//!     source.read(&ReadRequest::new(100, Duration::from_secs(1)), &mut batch).await;
//!     source.ack(batch.iter().map(|m| m.offset.clone()).collect()).await;
//!
//!     source.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Configuration
//!
//! ```rust,ignore
//! use nats_source::ConfigFormat;
//!
//! let config = ConfigFormat::Yaml.parse(r#"
//! url: nats://nats:4222
//! subject: orders
//! queue: order-readers
//! auth:
//!   token:
//!     name: nats-auth
//!     key: token
//! "#)?;
//! ```

// Module declarations
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod secrets;
pub mod source;
pub mod tls;

// Re-exports
pub use buffer::{BufferedMessage, MessageBuffer, DEFAULT_BUFFER_SIZE};
pub use config::{Auth, BasicAuth, ConfigFormat, NatsConfig, SecretKeySelector, TlsConfig};
pub use error::{NatsError, Result};
pub use message::{default_partition, Message, Offset, ReadRequest};
pub use secrets::{SecretReader, VolumeSecretReader};
pub use source::{NatsSource, NatsSourceBuilder, Source, SourceState};
