//! Cascade wire format — every message exchanged with client connections.
//!
//! Messages are JSON objects tagged by `type`. The tag doubles as the
//! pub/sub topic: clients subscribe to `newround`, `mix`, `reply` and
//! `error`, and publish `onion`. Byte payloads travel as lowercase hex.
//!
//! The set of message kinds is closed. Adding a variant here is a protocol
//! change for every client.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::round::{MixRound, Round};

// ── Payloads ──────────────────────────────────────────────────────────────────

/// An onion tagged with the round it was built for.
///
/// Used in both directions: clients submit one per round, and the
/// coordinator returns the chain's reply for that onion in the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnionMsg {
    pub round: Round,
    #[serde(with = "hex_bytes")]
    pub onion: Bytes,
}

/// Round-open announcement. Sent before settings are negotiated so clients
/// can fetch the configuration matching `config_hash` in the meantime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRound {
    pub round: Round,
    pub config_hash: String,
}

/// Error notice for a round. `round` is the round the recipient was
/// working with, not necessarily the coordinator's current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundError {
    pub round: Round,
    pub err: String,
}

impl RoundError {
    /// Notice sent to a client whose onion was tagged with a stale round.
    pub fn wrong_round(tagged: Round, expected: Round) -> Self {
        Self {
            round: tagged,
            err: format!("wrong round (want {expected})"),
        }
    }

    /// Notice broadcast when the chain fails to process a round.
    pub fn server_error(round: Round) -> Self {
        Self {
            round,
            err: "server error".to_string(),
        }
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// Messages a client may send to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Onion(OnionMsg),
}

/// Messages the coordinator sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    #[serde(rename = "newround")]
    NewRound(NewRound),
    Mix(MixRound),
    Reply(OnionMsg),
    Error(RoundError),
}

impl ServerMessage {
    /// The topic this message is published under.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::NewRound(_) => "newround",
            Self::Mix(_) => "mix",
            Self::Reply(_) => "reply",
            Self::Error(_) => "error",
        }
    }

    /// Round this message refers to.
    pub fn round(&self) -> Round {
        match self {
            Self::NewRound(m) => m.round,
            Self::Mix(m) => m.settings.round,
            Self::Reply(m) => m.round,
            Self::Error(m) => m.round,
        }
    }
}

// ── Hex helpers ───────────────────────────────────────────────────────────────

/// Any byte container as a single hex string.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: From<Vec<u8>>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(T::from).map_err(serde::de::Error::custom)
    }
}

pub mod hex_bytes_vec {
    use bytes::Bytes;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(items: &[Bytes], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&hex::encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .iter()
            .map(|s| {
                hex::decode(s)
                    .map(Bytes::from)
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
