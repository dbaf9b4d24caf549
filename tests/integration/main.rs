//! Cascade integration test harness.
//!
//! Tests drive a real `Coordinator` against in-process collaborators:
//! a scripted mix chain, an in-memory or on-disk state store, and
//! channel-backed client connections. Timing-dependent tests run with a
//! paused Tokio clock, so round phases elapse instantly once every task is
//! idle.
//!
//!   cargo test --test integration

mod shutdown;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::Receiver;

use cascade_core::chain::{ChainConfig, MixServer};
use cascade_core::config::CoordinatorSettings;
use cascade_core::round::{PersistedState, Round, RoundSettings, Signature, SignatureSet};
use cascade_core::wire::{ClientMessage, OnionMsg, ServerMessage};
use cascade_services::{
    ChannelConnection, Coordinator, CoordinatorDeps, Inbound, MixChain, MixnetError,
    PersistError, StateStore, StaticConfigSource,
};

// ── Timing ────────────────────────────────────────────────────────────────────

pub const ANNOUNCE: Duration = Duration::from_millis(100);
pub const MIX_WINDOW: Duration = Duration::from_secs(2);
pub const ROUND_GAP: Duration = Duration::from_secs(1);
pub const RETRY: Duration = Duration::from_secs(3);

/// Upper bound on any single expected event, in paused time.
const EVENT_TIMEOUT: Duration = Duration::from_secs(120);

pub fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        service: "Convo".to_string(),
        mix_wait_ms: MIX_WINDOW.as_millis() as u64,
        round_wait_ms: ROUND_GAP.as_millis() as u64,
        announce_delay_ms: ANNOUNCE.as_millis() as u64,
        retry_delay_ms: RETRY.as_millis() as u64,
        rpc_timeout_ms: 0,
        persist_path: None,
    }
}

pub fn chain_config(members: usize) -> ChainConfig {
    ChainConfig {
        service: "Convo".to_string(),
        mix_servers: (0..members)
            .map(|i| MixServer {
                address: format!("http://mix{i}.test"),
                public_key: hex::encode([i as u8 + 1; 32]),
            })
            .collect(),
    }
}

// ── Scripted mix chain ────────────────────────────────────────────────────────

/// Mix chain double. Fails the first `negotiate_failures` negotiations,
/// optionally fails every batch, and otherwise answers each onion with
/// `b"re:" || onion`.
#[derive(Default)]
pub struct ScriptedChain {
    negotiate_failures: AtomicUsize,
    fail_runs: bool,
    negotiations: Mutex<Vec<Round>>,
    batches: Mutex<Vec<(Round, Vec<Bytes>)>>,
}

impl ScriptedChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_negotiations(count: usize) -> Arc<Self> {
        Arc::new(Self {
            negotiate_failures: AtomicUsize::new(count),
            ..Default::default()
        })
    }

    pub fn failing_runs() -> Arc<Self> {
        Arc::new(Self {
            fail_runs: true,
            ..Default::default()
        })
    }

    /// Round number of every negotiation attempt, in order.
    pub fn negotiations(&self) -> Vec<Round> {
        self.negotiations.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<(Round, Vec<Bytes>)> {
        self.batches.lock().unwrap().clone()
    }

    pub fn reply_for(onion: &[u8]) -> Bytes {
        let mut reply = b"re:".to_vec();
        reply.extend_from_slice(onion);
        reply.into()
    }
}

#[async_trait]
impl MixChain for ScriptedChain {
    async fn negotiate_round(
        &self,
        members: &[MixServer],
        settings: &RoundSettings,
    ) -> Result<SignatureSet, MixnetError> {
        self.negotiations.lock().unwrap().push(settings.round);
        let remaining = self.negotiate_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.negotiate_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MixnetError::Transport {
                server: members[0].address.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(SignatureSet(vec![Signature(vec![0xaa; 64]); members.len()]))
    }

    async fn run_batch(
        &self,
        _head: &MixServer,
        _service: &str,
        round: Round,
        onions: Vec<Bytes>,
    ) -> Result<Vec<Bytes>, MixnetError> {
        self.batches.lock().unwrap().push((round, onions.clone()));
        if self.fail_runs {
            return Err(MixnetError::Status {
                server: "http://mix0.test".to_string(),
                status: 500,
            });
        }
        Ok(onions.iter().map(|o| Self::reply_for(o)).collect())
    }
}

// ── State stores ──────────────────────────────────────────────────────────────

/// In-memory store. With `fail_from = Some(n)`, the n-th persist (1-based)
/// and every later one fail.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<Round>>,
    attempts: AtomicUsize,
    fail_from: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_from(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_from: Some(n),
            ..Default::default()
        })
    }

    pub fn saved(&self) -> Vec<Round> {
        self.saved.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStore {
    fn persist(&self, state: &PersistedState) -> Result<(), PersistError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_from.is_some_and(|n| attempt >= n) {
            return Err(PersistError::Unavailable("disk full".to_string()));
        }
        self.saved.lock().unwrap().push(state.round);
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<PersistedState>, PersistError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .last()
            .copied()
            .map(PersistedState::new))
    }
}

/// Unique temp directory for on-disk tests.
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "cascade-it-{tag}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// ── Coordinator harness ───────────────────────────────────────────────────────

pub fn coordinator(
    chain: Arc<dyn MixChain>,
    store: Arc<dyn StateStore>,
    members: usize,
) -> Coordinator {
    Coordinator::new(
        settings(),
        CoordinatorDeps {
            chain,
            config: Arc::new(StaticConfigSource::new(chain_config(members))),
            store: Some(store),
        },
    )
}

/// A client connection registered with the coordinator.
pub struct Client {
    pub conn: Arc<ChannelConnection>,
    pub rx: Receiver<ServerMessage>,
}

impl Client {
    pub async fn connect(coordinator: &Coordinator) -> Self {
        let (conn, rx) = ChannelConnection::new(coordinator.hub().next_id());
        coordinator.handle(conn.clone(), Inbound::Connect).await;
        Self { conn, rx }
    }

    pub async fn submit(&self, coordinator: &Coordinator, round: Round, onion: &[u8]) {
        let msg = ClientMessage::Onion(OnionMsg {
            round,
            onion: Bytes::copy_from_slice(onion),
        });
        coordinator
            .handle(self.conn.clone(), Inbound::Message(msg))
            .await;
    }

    pub async fn disconnect(self, coordinator: &Coordinator) {
        coordinator.handle(self.conn, Inbound::Disconnect).await;
    }

    pub async fn next(&mut self) -> Result<ServerMessage> {
        match tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => bail!("connection channel closed"),
            Err(_) => bail!("no message within {EVENT_TIMEOUT:?}"),
        }
    }

    /// Skip messages until one matches `pred`.
    pub async fn wait_for(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> Result<ServerMessage> {
        loop {
            let msg = self.next().await.context("waiting for message")?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }

    pub async fn wait_for_topic(&mut self, topic: &str, round: Round) -> Result<ServerMessage> {
        self.wait_for(|m| m.topic() == topic && m.round() == round)
            .await
            .with_context(|| format!("waiting for {topic} round {round}"))
    }
}

/// Poll `cond` in paused time until it holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {EVENT_TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
