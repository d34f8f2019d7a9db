use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slskq_core::events::{create_event_log, EventStore, SqliteEventStore};
use slskq_core::{
    load_config, validate_config, EventBroadcaster, JobEvent, JobStore, Orchestrator, SlskdClient,
    SqliteJobStore, TransferClient,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slskq_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("slskqd {}", VERSION);

    // Determine config path
    let config_path = std::env::var("SLSKQ_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("slskq.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!("Database path: {:?}", config.database.path);

    // Create SQLite job store
    let job_store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Create the durable event log and its writer task
    let event_store: Arc<dyn EventStore> = Arc::new(
        SqliteEventStore::new(&config.database.path).context("Failed to create event store")?,
    );
    let (persist_tx, event_writer) =
        create_event_log(Arc::clone(&event_store), config.events.persist_buffer);
    let writer_handle = tokio::spawn(event_writer.run());

    let broadcaster = Arc::new(
        EventBroadcaster::new(config.events.replay_buffer).with_persistence(persist_tx),
    );

    // Create the transfer client
    let client: Arc<dyn TransferClient> = match &config.transfer.backend {
        slskq_core::config::TransferBackend::Slskd => {
            let slskd_config = config
                .transfer
                .slskd
                .clone()
                .context("transfer.slskd configuration missing")?;
            info!("Using slskd transfer backend at {}", slskd_config.url);
            Arc::new(SlskdClient::new(slskd_config).context("Failed to create slskd client")?)
        }
    };

    // Start the orchestrator
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        Arc::clone(&job_store),
        Arc::clone(&client),
        Arc::clone(&broadcaster),
    );
    let handle = orchestrator.start();
    info!(
        "Orchestrator started with {} worker slots",
        config.orchestrator.worker_capacity
    );

    // Mirror the event stream into the log
    let log_task = {
        let subscription = handle
            .subscribe(None)
            .context("Failed to subscribe to events")?;
        tokio::spawn(log_events(subscription.live))
    };

    shutdown_signal().await;
    info!("Shutdown signal received");

    handle.shutdown().await.ok();
    log_task.abort();

    // Dropping the last broadcaster reference closes the persistence
    // channel so the writer can drain and exit.
    drop(handle);
    drop(broadcaster);
    let _ = writer_handle.await;
    info!("Event writer stopped");

    Ok(())
}

/// Log live orchestrator events.
async fn log_events(mut live: tokio::sync::broadcast::Receiver<slskq_core::EventRecord>) {
    loop {
        match live.recv().await {
            Ok(record) => match &record.event {
                JobEvent::StateChanged {
                    job_id,
                    from,
                    to,
                    reason,
                } => match reason {
                    Some(reason) => {
                        info!("[{}] job {} {} -> {} ({})", record.seq, job_id, from, to, reason)
                    }
                    None => info!("[{}] job {} {} -> {}", record.seq, job_id, from, to),
                },
                JobEvent::Progress { .. } => debug!("[{}] {:?}", record.seq, record.event),
                other => info!("[{}] {:?}", record.seq, other),
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Event log fell behind, skipped {} events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
