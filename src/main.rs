//! Standalone NATS source runner
//!
//! Loads the configuration from `NATS_CONFIG` or the mounted config volume,
//! subscribes, and drains batches until SIGINT/SIGTERM.

use nats_source::{config, NatsSource, ReadRequest, Source};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const READ_BATCH_SIZE: usize = 500;
const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "NATS source failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run() -> nats_source::Result<()> {
    let config = config::load_from_env()?;
    let source = NatsSource::new(config).await?;

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            stop.cancel();
        }
    });

    while !stop.is_cancelled() {
        let mut batch = Vec::with_capacity(READ_BATCH_SIZE);
        let request =
            ReadRequest::new(READ_BATCH_SIZE, READ_TIMEOUT).with_cancellation(stop.clone());
        source.read(&request, &mut batch).await;
        if batch.is_empty() {
            continue;
        }

        for message in &batch {
            tracing::debug!(
                id = %message.id,
                partition = message.offset.partition_id,
                bytes = message.value.len(),
                event_time = %message.event_time,
                "Received message"
            );
        }
        tracing::info!(count = batch.len(), "Read batch");
        source
            .ack(batch.into_iter().map(|message| message.offset).collect())
            .await;
    }

    source.close().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
