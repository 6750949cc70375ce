//! oracled — oracle node daemon, running an in-process devnet.

use anyhow::Result;
use std::time::Duration;

use oracle_core::config::OracleConfig;

mod devnet;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let written = OracleConfig::write_default_if_missing();
    let loaded = OracleConfig::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.node.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match written {
        Ok(path) => tracing::debug!(path = %path.display(), "config file"),
        Err(e) => tracing::warn!(error = %e, "failed to write default config"),
    }
    if let Err(e) = &loaded {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }

    tracing::info!(
        version = %config.node.version,
        environment = %config.node.environment,
        staked = config.node.staked,
        nodes = config.devnet.nodes,
        "oracled starting"
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn nodes ──────────────────────────────────────────────────────────

    let devnet = devnet::Devnet::start(&config)?;
    let local = devnet
        .local()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("devnet started without nodes"))?;
    tracing::info!(
        attached = devnet.hub.len(),
        local = %local.peer_id().short(),
        "devnet running"
    );

    let probe_task = if config.devnet.probe_interval_secs > 0 {
        let interval = Duration::from_secs(config.devnet.probe_interval_secs);
        Some(tokio::spawn(devnet::probe_loop(local.clone(), interval)))
    } else {
        None
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    shutdown_rx.recv().await.ok();
    tracing::info!("shutting down");

    if let Some(task) = probe_task {
        task.abort();
    }
    drop(local);
    drop(devnet);

    Ok(())
}
