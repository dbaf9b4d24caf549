//! cascaded — Cascade mix network round coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use cascade_core::config::CascadeConfig;
use cascade_services::{ConfigSource, Coordinator, CoordinatorDeps, HttpMixChain, StaticConfigSource};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CascadeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CascadeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CascadeConfig::default()
    });
    tracing::info!(service = %config.coordinator.service, "cascaded starting");

    // Mix chain
    let chain_path = config.chain.config_path.clone();
    let source = Arc::new(StaticConfigSource::load(&chain_path).with_context(|| {
        format!("failed to load mix chain config from {}", chain_path.display())
    })?);
    source
        .current_config()
        .0
        .check_service(&config.coordinator.service)
        .with_context(|| format!("mix chain config {} rejected", chain_path.display()))?;
    let chain = Arc::new(
        HttpMixChain::new(config.coordinator.rpc_timeout())
            .context("failed to build mix chain client")?,
    );

    // Coordinator
    let coordinator = Arc::new(Coordinator::new(
        config.coordinator.clone(),
        CoordinatorDeps {
            chain,
            config: source.clone(),
            store: None,
        },
    ));
    coordinator.start().context("failed to start coordinator")?;

    // ── Shutdown ─────────────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    spawn_chain_reload(source.clone(), chain_path);

    // ── API ──────────────────────────────────────────────────────────────────

    let mut api_task = {
        let state = cascade_api::ApiState {
            coordinator: coordinator.clone(),
            config: source,
        };
        let addr = config.network.listen_addr.clone();
        let mut stop_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            cascade_api::serve(state, &addr, async move {
                let _ = stop_rx.recv().await;
            })
            .await
        })
    };

    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut outcome = Ok(());

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = &mut api_task => {
            tracing::error!("API task exited: {:?}", r);
            outcome = Err(anyhow::anyhow!("API server stopped"));
        }
        _ = coordinator.join() => {
            tracing::error!("round loop exited, restart required");
            outcome = Err(anyhow::anyhow!("round loop stopped"));
        }
    }

    if let Err(e) = coordinator.stop() {
        tracing::debug!(error = %e, "coordinator already stopped");
    }
    coordinator.join().await;

    let _ = shutdown_tx.send(());
    if !api_task.is_finished() {
        let _ = api_task.await;
    }
    outcome
}

/// Re-read the chain document on SIGHUP. The new chain applies from the
/// next round.
#[cfg(unix)]
fn spawn_chain_reload(source: Arc<StaticConfigSource>, path: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP handler unavailable, chain reload disabled");
                return;
            }
        };
        while hangups.recv().await.is_some() {
            match source.reload(&path) {
                Ok(hash) => tracing::info!(hash = %hash, "mix chain config reloaded"),
                Err(e) => tracing::error!(error = %e, "mix chain reload failed, keeping current"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_chain_reload(_source: Arc<StaticConfigSource>, _path: PathBuf) {}
