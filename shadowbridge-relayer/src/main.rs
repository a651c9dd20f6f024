use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shadowbridge_relayer::config::RelayerConfig;
use shadowbridge_relayer::listener::{IndexerFeed, SourceListener};
use shadowbridge_relayer::processor::resume_pending;
use shadowbridge_relayer::server::{app_router, run_server};
use shadowbridge_relayer::Relayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shadowbridge_relayer=debug".into()),
        )
        .init();

    let config = RelayerConfig::from_env().context("failed to load relayer configuration")?;
    info!("Starting shadowbridge-relayer");
    info!(
        port = config.port,
        chain_mode = ?config.chain.mode,
        fee_bps = config.intake.fee_bps,
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let relayer = Relayer::build(&config, shutdown.clone())?;

    if let Err(e) = resume_pending(relayer.store.as_ref(), &relayer.handle).await {
        warn!(error = %e, "failed to resume transfers from previous run");
    }
    let processor_handle = relayer.processor.spawn();

    let listener_handle = match (&config.source.indexer_url, &config.source.contract_address) {
        (Some(url), Some(contract)) => {
            let feed = IndexerFeed::new(url.clone(), contract.clone());
            let listener = SourceListener::new(
                feed,
                relayer.service.clone(),
                contract.clone(),
                config.source.poll_interval,
            );
            Some(tokio::spawn(listener.run(shutdown.clone())))
        }
        _ => {
            warn!("Source listener not started: contract address or indexer URL missing");
            None
        }
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let router = app_router(relayer.state, config.enable_cors);
    if let Err(e) = run_server(router, config.port, shutdown.clone()).await {
        error!("server error: {}", e);
        shutdown.cancel();
    }

    if let Err(e) = processor_handle.await {
        error!("processor task failed: {}", e);
    }
    if let Some(handle) = listener_handle {
        if let Err(e) = handle.await {
            error!("listener task failed: {}", e);
        }
    }
    info!("shadowbridge-relayer stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
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
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
