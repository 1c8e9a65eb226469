//! Connection bootstrap
//!
//! Translates a [`NatsConfig`] into `async_nats::ConnectOptions` and opens the
//! connection. Only the initial connect can fail; once connected, the client
//! reconnects indefinitely on its own.
//!
//! # Test Reference
//! - Test: `connection::tests`

use crate::config::{Auth, NatsConfig, SecretKeySelector};
use crate::error::{NatsError, Result};
use crate::secrets::SecretReader;
use crate::tls;
use async_nats::{Client, ConnectOptions, Event};
use std::path::Path;
use std::time::Duration;
use tracing::{Instrument, Span};

/// Fixed delay between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Build connect options from configuration
///
/// Reconnects are unlimited with a fixed delay; connection state changes are
/// logged inside `span`. TLS and credential material is resolved through
/// `secrets`.
pub fn connect_options(
    config: &NatsConfig,
    secrets: &dyn SecretReader,
    span: &Span,
) -> Result<ConnectOptions> {
    let event_span = span.clone();
    let mut options = ConnectOptions::new()
        .max_reconnects(None::<usize>)
        .reconnect_delay_callback(|_attempts| RECONNECT_DELAY)
        .event_callback(move |event| log_event(event).instrument(event_span.clone()));

    if let Some(tls_config) = &config.tls {
        let client_config = tls::client_config(tls_config, secrets)?;
        options = options.require_tls(true).tls_client_config(client_config);
    }

    match &config.auth {
        Some(Auth::Basic(basic)) => {
            let user = resolve_secret(secrets, &basic.user, "basic auth user")?;
            let password = resolve_secret(secrets, &basic.password, "basic auth password")?;
            options = options.user_and_password(user, password);
        }
        Some(Auth::Token(token)) => {
            let token = resolve_secret(secrets, token, "auth token")?;
            options = options.token(token);
        }
        Some(Auth::NKey(nkey)) => {
            let path = secrets.secret_path(nkey).map_err(|e| {
                NatsError::AuthResolution(format!("failed to get configured nkey file, {}", e))
            })?;
            options = options.nkey(nkey_seed_from_file(&path)?);
        }
        None => {}
    }

    Ok(options)
}

/// Open a connection to the configured NATS server(s)
pub async fn connect(
    config: &NatsConfig,
    secrets: &dyn SecretReader,
    span: &Span,
) -> Result<Client> {
    let options = connect_options(config, secrets, span)?;

    async {
        tracing::info!(url = %config.url, "Connecting to NATS server");
        let client = options.connect(config.url.as_str()).await.map_err(|e| {
            tracing::error!(url = %config.url, error = %e, "Failed to connect to NATS server");
            NatsError::Connection(format!("failed to connect to nats server, {}", e))
        })?;
        tracing::info!(url = %config.url, "Connected to NATS server");
        Ok::<_, NatsError>(client)
    }
    .instrument(span.clone())
    .await
}

fn resolve_secret(
    secrets: &dyn SecretReader,
    selector: &SecretKeySelector,
    what: &str,
) -> Result<String> {
    secrets
        .secret(selector)
        .map_err(|e| NatsError::AuthResolution(format!("failed to get {}, {}", what, e)))
}

/// Extract and validate the seed from an NKey seed or creds file
fn nkey_seed_from_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        NatsError::AuthResolution(format!(
            "failed to read nkey file {}, {}",
            path.display(),
            e
        ))
    })?;

    let seed = content
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('S'))
        .ok_or_else(|| {
            NatsError::AuthDerivation(format!("no nkey seed found in {}", path.display()))
        })?;

    let key_pair = nkeys::KeyPair::from_seed(seed)
        .map_err(|e| NatsError::AuthDerivation(format!("failed to get NKey, {}", e)))?;
    tracing::debug!(public_key = %key_pair.public_key(), "Loaded NKey seed");

    Ok(seed.to_string())
}

async fn log_event(event: Event) {
    match event {
        Event::Connected => tracing::info!("NATS connected"),
        Event::Disconnected => tracing::info!("NATS disconnected"),
        Event::SlowConsumer(sid) => tracing::warn!(sid, "NATS slow consumer"),
        Event::ServerError(e) => tracing::error!(error = %e, "NATS server error"),
        Event::ClientError(e) => tracing::error!(error = %e, "NATS client error"),
        other => tracing::debug!(event = %other, "NATS client event"),
    }
}
