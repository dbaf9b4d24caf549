//! Round numbering, negotiated settings, and the durable snapshot.

use serde::{Deserialize, Serialize};

/// Round number. Strictly increasing for the lifetime of a deployment,
/// including across restarts.
pub type Round = u32;

/// Domain separator for settings signatures.
const SETTINGS_CONTEXT: &[u8] = b"cascade.round-settings.v1";

/// Parameters the chain commits to before clients submit onions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSettings {
    /// Mixing service the round belongs to, e.g. "Convo".
    pub service: String,
    pub round: Round,
}

impl RoundSettings {
    /// Bytes each chain member signs.
    ///
    ///   context || u32_le(len(service)) || service || u32_le(round)
    pub fn signing_message(&self) -> Vec<u8> {
        let service = self.service.as_bytes();
        let mut msg = Vec::with_capacity(SETTINGS_CONTEXT.len() + 8 + service.len());
        msg.extend_from_slice(SETTINGS_CONTEXT);
        msg.extend_from_slice(&(service.len() as u32).to_le_bytes());
        msg.extend_from_slice(service);
        msg.extend_from_slice(&self.round.to_le_bytes());
        msg
    }
}

/// One signature per chain member, in chain order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureSet(pub Vec<Signature>);

impl SignatureSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.0.iter()
    }
}

/// A single member's signature, hex on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(#[serde(with = "crate::wire::hex_bytes")] pub Vec<u8>);

/// Announcement of a negotiated round: what the chain signed and when the
/// submission window closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixRound {
    pub settings: RoundSettings,
    pub signatures: SignatureSet,
    /// Unix milliseconds after which clients should stop submitting.
    pub end_time_ms: u64,
}

/// Durable image of the coordinator's round counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Snapshot format version.
    pub version: u32,
    /// Last round that was announced (or about to be).
    pub round: Round,
}

impl PersistedState {
    pub const VERSION: u32 = 1;

    pub fn new(round: Round) -> Self {
        Self {
            version: Self::VERSION,
            round,
        }
    }
}
