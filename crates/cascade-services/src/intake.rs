//! Onion intake: the current round number and the batch collected for it.
//!
//! A single lock covers the round counter, the batch and the latest mix
//! announcement, so a submission is either accepted into the batch of the
//! round it names or rejected with the round that was current at that
//! instant. Nothing inside the lock awaits.
//!
//! A round is open from the moment it is advanced to until its batch is
//! drained. Between the drain and the next advance every submission is
//! rejected, including ones tagged with the round just closed. A fresh or
//! reset intake is closed until its first advance.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use cascade_core::round::{MixRound, PersistedState, Round};
use cascade_core::wire::{OnionMsg, RoundError, ServerMessage};

use crate::coordinator::CoordinatorError;
use crate::hub::Connection;
use crate::persist::StateStore;

/// Initial batch capacity before any round has been drained.
const INITIAL_BATCH_CAPACITY: usize = 128;

/// An accepted onion and the connection its reply goes back to.
#[derive(Clone)]
pub struct Submission {
    pub sender: Arc<dyn Connection>,
    pub onion: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// The onion was not accepted; the sender was told which round to use.
    WrongRound { expected: Round },
}

struct RoundState {
    round: Round,
    open: bool,
    onions: Vec<Submission>,
    latest_mix: Option<MixRound>,
}

impl RoundState {
    /// Round a rejected sender should target next.
    fn wanted(&self) -> Round {
        if self.open {
            self.round
        } else {
            self.round.saturating_add(1)
        }
    }
}

/// Shared handle to the round state. Clones share the same state.
#[derive(Clone)]
pub struct OnionIntake {
    state: Arc<Mutex<RoundState>>,
}

impl Default for OnionIntake {
    fn default() -> Self {
        Self::new()
    }
}

impl OnionIntake {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RoundState {
                round: 0,
                open: false,
                onions: Vec::with_capacity(INITIAL_BATCH_CAPACITY),
                latest_mix: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept `msg` into the current batch if it names the current round
    /// and that round is still open.
    ///
    /// Otherwise the sender receives a `wrong round` error notice. The
    /// notice is sent after the lock is released; a failed send is logged
    /// and otherwise ignored.
    pub async fn submit(&self, sender: Arc<dyn Connection>, msg: OnionMsg) -> SubmitOutcome {
        let expected = {
            let mut state = self.lock();
            if state.open && msg.round == state.round {
                state.onions.push(Submission {
                    sender,
                    onion: msg.onion,
                });
                return SubmitOutcome::Accepted;
            }
            state.wanted()
        };

        tracing::debug!(
            conn = sender.id(),
            got = msg.round,
            expected,
            "onion for wrong round"
        );
        let notice = ServerMessage::Error(RoundError::wrong_round(msg.round, expected));
        if let Err(e) = sender.send(notice).await {
            tracing::warn!(conn = sender.id(), error = %e, "failed to send round mismatch notice");
        }
        SubmitOutcome::WrongRound { expected }
    }

    pub fn current_round(&self) -> Round {
        self.lock().round
    }

    /// Most recent negotiated round, if any round has been negotiated.
    pub fn latest_mix(&self) -> Option<MixRound> {
        self.lock().latest_mix.clone()
    }

    /// Number of onions collected for the current round.
    pub fn pending(&self) -> usize {
        self.lock().onions.len()
    }

    /// Resume from a persisted round number. The resumed round stays
    /// closed; nothing is accepted until the next advance.
    pub(crate) fn reset(&self, round: Round) {
        let mut state = self.lock();
        state.round = round;
        state.open = false;
        state.onions.clear();
    }

    /// Move to the next round number.
    ///
    /// The new number is persisted before it becomes visible: if the store
    /// fails, the in-memory round still equals the last persisted one.
    pub(crate) fn advance(&self, store: &dyn StateStore) -> Result<Round, CoordinatorError> {
        let mut state = self.lock();
        let next = state
            .round
            .checked_add(1)
            .ok_or(CoordinatorError::RoundExhausted)?;
        store.persist(&PersistedState::new(next))?;
        state.round = next;
        state.open = true;
        Ok(next)
    }

    /// Close the current round and take its batch, leaving an empty one
    /// sized like the batch just taken.
    pub(crate) fn drain(&self) -> Vec<Submission> {
        let mut state = self.lock();
        state.open = false;
        let capacity = state.onions.len();
        std::mem::replace(&mut state.onions, Vec::with_capacity(capacity))
    }

    pub(crate) fn set_latest_mix(&self, mix: MixRound) {
        self.lock().latest_mix = Some(mix);
    }
}
