//! Application lifecycle and graceful shutdown.
//!
//! [`Application`] wires the configured topics, bus and store into one
//! consumer and runs it until the process is asked to stop:
//!
//! 1. **Startup**: spawn the ingest consumer as a background task
//! 2. **Runtime**: the consumer applies messages to the store
//! 3. **Shutdown**: on Ctrl+C or SIGTERM, broadcast the shutdown signal and
//!    wait for the consumer to drain its current message (10s timeout)
//!
//! Shutdown never interrupts a message mid-mutation; the consumer checks the
//! signal only between messages.

use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::dispatch::{Dispatcher, TopicMap};
use depot_core::bus::MessageBus;
use depot_core::store::InventoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// How long each consumer gets to finish its current message on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Running application with its background consumers.
///
/// # Lifecycle
///
/// 1. Created via [`Application::new`]
/// 2. Started via [`Application::run`]
/// 3. Runs until a shutdown signal is received
pub struct Application {
    /// Bus consumers, spawned on `run`.
    consumers: Vec<EventConsumer>,

    /// Shutdown signal broadcaster.
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Assemble the ingest pipeline from its parts.
    ///
    /// One consumer subscribes to all four topics so mutations stay strictly
    /// serialized; the bus is the only source of ordering between them.
    #[must_use]
    pub fn new(
        config: &Config,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn InventoryStore>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let topics: Vec<String> = config.all_topics().into_iter().map(str::to_owned).collect();
        let dispatcher = Arc::new(Dispatcher::new(TopicMap::new(&config.topics), store));
        let consumer = EventConsumer::new("ingest", topics, bus, dispatcher, shutdown_rx)
            .with_retry_delay(config.retry_delay());

        Self {
            consumers: vec![consumer],
            shutdown_tx,
        }
    }

    /// Run until a shutdown signal is received, then stop the consumers.
    pub async fn run(self) {
        info!(consumer_count = self.consumers.len(), "starting consumers");
        let handles: Vec<_> = self
            .consumers
            .into_iter()
            .map(EventConsumer::spawn)
            .collect();

        shutdown_signal().await;

        info!("initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());
        Self::await_shutdown(handles).await;
        info!("graceful shutdown complete");
    }

    /// Wait for the background tasks to finish, bounded per task.
    async fn await_shutdown(handles: Vec<tokio::task::JoinHandle<()>>) {
        for (idx, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!(consumer = idx, "consumer stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = idx, error = %e, "consumer task failed"),
                Err(_) => warn!(consumer = idx, "consumer shutdown timed out"),
            }
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
///
/// If a handler cannot be installed the corresponding branch is disabled
/// rather than aborting the process.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C");
        }
        () = terminate => {
            info!("received SIGTERM");
        }
    }
}
