//! Error types for the NATS source
//!
//! Every construction-time failure is fatal to source startup; the caller is
//! expected to abort rather than retry.

use std::path::PathBuf;
use thiserror::Error;

/// NATS source error types
#[derive(Debug, Error)]
pub enum NatsError {
    /// Malformed or contradictory settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret or certificate file could not be read
    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed certificate material
    #[error("TLS error: {0}")]
    Tls(String),

    /// A credential secret could not be resolved
    #[error("Auth resolution error: {0}")]
    AuthResolution(String),

    /// NKey credential could not be derived from its seed
    #[error("Auth derivation error: {0}")]
    AuthDerivation(String),

    /// Initial connection to the NATS server failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Queue subscription failed
    #[error("Subscribe error: {0}")]
    Subscription(String),

    /// Configuration (de)serialization error
    #[error("{0}")]
    Parse(String),
}

/// Result type alias for NATS source operations
pub type Result<T> = std::result::Result<T, NatsError>;
