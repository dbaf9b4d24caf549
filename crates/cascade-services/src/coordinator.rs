//! The round coordinator.
//!
//! One driver task runs rounds back to back:
//!
//!   advance + persist → announce → negotiate (retrying the same round)
//!   → publish settings → mix window → drain + execute → round gap
//!
//! Client connections talk to the coordinator through [`Coordinator::handle`].
//! Batch execution runs on its own task so the next round can open while
//! the chain is still mixing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;

use cascade_core::config::CoordinatorSettings;
use cascade_core::round::{MixRound, Round, RoundSettings};
use cascade_core::wire::{ClientMessage, NewRound, ServerMessage};

use crate::config_source::ConfigSource;
use crate::executor::MixExecutor;
use crate::hub::{Connection, Hub, Inbound};
use crate::intake::OnionIntake;
use crate::lifecycle::{Phase, Shutdown, ShutdownListener};
use crate::mixnet::{MixChain, MixnetError};
use crate::negotiator::RoundSettingsNegotiator;
use crate::persist::{FileStateStore, PersistError, StateStore};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no persist path configured")]
    NoPersistPath,
    #[error("coordinator already started")]
    AlreadyStarted,
    #[error("server already closed")]
    ServerClosed,
    #[error("persisting round state: {0}")]
    Persist(#[from] PersistError),
    #[error("round counter exhausted")]
    RoundExhausted,
}

/// Collaborators the coordinator drives.
pub struct CoordinatorDeps {
    pub chain: Arc<dyn MixChain>,
    pub config: Arc<dyn ConfigSource>,
    /// Overrides the file store at `persist_path` when set.
    pub store: Option<Arc<dyn StateStore>>,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub round: Round,
    pub pending_onions: usize,
    pub connections: usize,
    pub running: bool,
    pub latest_mix: Option<MixRound>,
}

struct Inner {
    settings: CoordinatorSettings,
    chain: Arc<dyn MixChain>,
    config: Arc<dyn ConfigSource>,
    hub: Hub,
    intake: OnionIntake,
    shutdown: Shutdown,
    /// Set when the driver task exits, for any reason.
    finished: watch::Sender<bool>,
}

pub struct Coordinator {
    inner: Arc<Inner>,
    store: Option<Arc<dyn StateStore>>,
    started: AtomicBool,
}

impl Coordinator {
    pub fn new(settings: CoordinatorSettings, deps: CoordinatorDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                chain: deps.chain,
                config: deps.config,
                hub: Hub::new(),
                intake: OnionIntake::new(),
                shutdown: Shutdown::new(),
                finished: watch::channel(false).0,
            }),
            store: deps.store,
            started: AtomicBool::new(false),
        }
    }

    /// Resume the round counter from durable state and spawn the driver.
    ///
    /// Must be called from within a Tokio runtime. A coordinator runs at
    /// most once; it cannot be restarted after [`stop`](Self::stop).
    pub fn start(&self) -> Result<(), CoordinatorError> {
        let store: Arc<dyn StateStore> = match &self.store {
            Some(store) => Arc::clone(store),
            None => {
                let path = self
                    .inner
                    .settings
                    .persist_path
                    .clone()
                    .ok_or(CoordinatorError::NoPersistPath)?;
                Arc::new(FileStateStore::new(path))
            }
        };
        if self.inner.shutdown.is_triggered() {
            return Err(CoordinatorError::ServerClosed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let resumed = match store.load_latest() {
            Ok(state) => state.map(|s| s.round).unwrap_or(0),
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        self.inner.intake.reset(resumed);
        tracing::info!(
            round = resumed,
            service = %self.inner.settings.service,
            "coordinator starting"
        );

        let inner = Arc::clone(&self.inner);
        let listener = inner.shutdown.listener();
        tokio::spawn(drive(inner, store, listener));
        Ok(())
    }

    /// Signal shutdown. Succeeds once; later calls return
    /// [`CoordinatorError::ServerClosed`].
    pub fn stop(&self) -> Result<(), CoordinatorError> {
        if self.inner.shutdown.trigger() {
            tracing::info!("coordinator stop requested");
            Ok(())
        } else {
            Err(CoordinatorError::ServerClosed)
        }
    }

    /// Wait for the driver task to exit. Returns immediately if it was
    /// never started. Safe to call from several places and to cancel.
    pub async fn join(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let mut finished = self.inner.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !*self.inner.finished.borrow()
    }

    pub fn hub(&self) -> &Hub {
        &self.inner.hub
    }

    pub fn intake(&self) -> &OnionIntake {
        &self.inner.intake
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            round: self.inner.intake.current_round(),
            pending_onions: self.inner.intake.pending(),
            connections: self.inner.hub.len(),
            running: self.is_running(),
            latest_mix: self.inner.intake.latest_mix(),
        }
    }

    /// Process one event from a client connection.
    pub async fn handle(&self, conn: Arc<dyn Connection>, event: Inbound) {
        match event {
            Inbound::Connect => {
                self.inner.hub.register(Arc::clone(&conn));
                if let Some(mix) = self.inner.intake.latest_mix() {
                    if let Err(e) = conn.send(ServerMessage::Mix(mix)).await {
                        tracing::debug!(conn = conn.id(), error = %e, "failed to send latest round");
                    }
                }
            }
            Inbound::Message(ClientMessage::Onion(msg)) => {
                self.inner.intake.submit(conn, msg).await;
            }
            Inbound::Disconnect => self.inner.hub.unregister(conn.id()),
        }
    }
}

/// Marks the driver finished when dropped, including on panic.
struct FinishedGuard<'a>(&'a watch::Sender<bool>);

impl Drop for FinishedGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// The round loop. Exits on shutdown or on a persistence failure.
async fn drive(inner: Arc<Inner>, store: Arc<dyn StateStore>, mut shutdown: ShutdownListener) {
    let _finished = FinishedGuard(&inner.finished);
    let settings = &inner.settings;
    let negotiator = RoundSettingsNegotiator::new(Arc::clone(&inner.chain), settings.rpc_timeout());
    let executor = Arc::new(MixExecutor::new(Arc::clone(&inner.chain), inner.hub.clone()));

    'rounds: loop {
        // The store may fsync; keep that off the runtime workers.
        let advanced = {
            let intake = inner.intake.clone();
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || intake.advance(store.as_ref())).await
        };
        let round = match advanced {
            Ok(Ok(round)) => round,
            Ok(Err(e)) => {
                tracing::error!(
                    round = inner.intake.current_round(),
                    error = %e,
                    "error persisting state"
                );
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "persist task failed");
                break;
            }
        };

        // Same round number on every attempt.
        let (chain, round_settings, signatures) = loop {
            let (chain, config_hash) = inner.config.current_config();
            tracing::info!(round, config_hash = %config_hash, "starting new round");
            inner
                .hub
                .broadcast(ServerMessage::NewRound(NewRound { round, config_hash }))
                .await;
            if !shutdown.wait(Phase::Announce, settings.announce_delay()).await {
                break 'rounds;
            }

            let round_settings = RoundSettings {
                service: settings.service.clone(),
                round,
            };
            match chain.check_service(&settings.service) {
                Ok(()) => match negotiator
                    .negotiate(&mut shutdown, &chain.mix_servers, &round_settings)
                    .await
                {
                    Ok(signatures) => break (chain, round_settings, signatures),
                    Err(MixnetError::Cancelled) => break 'rounds,
                    Err(e) => {
                        tracing::error!(round, error = %e, "error negotiating round settings");
                    }
                },
                Err(e) => tracing::error!(round, error = %e, "chain config rejected"),
            }
            if !shutdown.wait(Phase::Retry, settings.retry_delay()).await {
                break 'rounds;
            }
        };

        let mix = MixRound {
            settings: round_settings,
            signatures,
            end_time_ms: unix_millis().saturating_add(settings.mix_wait_ms),
        };
        tracing::info!(round, signatures = mix.signatures.len(), "announcing mixnet settings");
        inner.intake.set_latest_mix(mix.clone());
        inner.hub.broadcast(ServerMessage::Mix(mix)).await;

        if !shutdown.wait(Phase::MixWindow, settings.mix_wait()).await {
            break;
        }

        let batch = inner.intake.drain();
        match chain.head() {
            Some(head) => {
                tracing::info!(round, onions = batch.len(), "running round");
                // Failures surface to clients as a broadcast error notice.
                let _ = executor.spawn(head.clone(), chain.service.clone(), round, batch);
            }
            None => tracing::error!(round, "mix chain has no head, dropping batch"),
        }

        tracing::info!(round, "waiting for next round");
        if !shutdown.wait(Phase::RoundGap, settings.round_wait()).await {
            break;
        }
    }

    tracing::info!(round = inner.intake.current_round(), "shutting down");
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
