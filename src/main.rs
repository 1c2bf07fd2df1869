//! Transaction Manager - signing and submission gateway for a single EVM account
//!
//! Exposes an HTTP API that prices, signs and submits transactions with
//! serialized nonce assignment, and tracks their confirmation.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod tx;

use chain::{ChainClient, ChainProvider};
use config::Settings;
use metrics::MetricsServer;
use tx::{ConfirmationTracker, FeeEstimator, LocalSigner, NonceManager, TransactionExecutor, TxSigner};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Transaction Manager v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!("Loaded configuration");

    // Connect to the node
    let provider = ChainProvider::new(settings.chain.clone())?;
    let chain_id = provider.chain_id().await?;
    info!("Using RPC endpoint {} (chain {})", provider.rpc_url(), chain_id);
    let chain: Arc<dyn ChainClient> = Arc::new(provider);

    let signer: Arc<dyn TxSigner> = Arc::new(LocalSigner::from_env(&settings.wallet, chain_id)?);
    let address = signer.address();

    let tracker = Arc::new(ConfirmationTracker::new(
        chain.clone(),
        settings.confirmation.poll_interval(),
    ));

    // Let any transaction broadcast before a restart land before reading the nonce
    let head = tracker
        .wait_for_blocks(1, settings.confirmation.max_waiting_time())
        .await?;
    info!("Chain head at block {}", head);

    let nonces = Arc::new(NonceManager::new());
    let nonce = nonces.initialize(address, chain.as_ref()).await?;
    info!("Nonce sequencer for {:?} starts at {}", address, nonce);

    let estimator = FeeEstimator::new(settings.fees.clone())?;
    let executor = Arc::new(TransactionExecutor::new(
        chain.clone(),
        signer,
        nonces,
        estimator,
    ));

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let state = api::AppState {
        executor,
        tracker,
        confirmation: settings.confirmation.clone(),
    };

    info!("Transaction Manager is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);

    // Serve until a shutdown signal arrives
    if let Err(e) = api::run_server(settings.api.clone(), state, shutdown_signal()).await {
        error!("API server error: {}", e);
    }

    info!("Shutdown signal received, stopping...");

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Transaction Manager stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,transaction_manager=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
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
