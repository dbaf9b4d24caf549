//! cascade-core — wire messages, round types, chain configuration and
//! signature checks. All other Cascade crates depend on this one.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod round;
pub mod wire;

pub use chain::{ChainConfig, MixServer};
pub use round::{MixRound, PersistedState, Round, RoundSettings, Signature, SignatureSet};
pub use wire::{ClientMessage, NewRound, OnionMsg, RoundError, ServerMessage};
