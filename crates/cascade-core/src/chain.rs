//! Mix chain configuration: which servers form the cascade, in order.
//!
//! The coordinator reads the current chain once per round. Clients fetch
//! the same document and check it against the `config_hash` in each
//! round announcement.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::crypto;

/// One mix server in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixServer {
    /// Base URL of the server's RPC endpoint, e.g. "https://mix1.example:2718".
    pub address: String,
    /// Ed25519 verifying key, hex-encoded.
    pub public_key: String,
}

impl MixServer {
    /// Decode the hex public key into raw bytes.
    pub fn key_bytes(&self) -> Option<[u8; 32]> {
        let bytes = hex::decode(&self.public_key).ok()?;
        bytes.try_into().ok()
    }
}

/// The chain document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Mixing service this chain runs.
    pub service: String,
    /// Servers in mixing order. The first is the chain head.
    pub mix_servers: Vec<MixServer>,
}

impl ChainConfig {
    /// Read a chain document from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::ParseJsonFailed(path.to_path_buf(), e))
    }

    /// Reject a chain document written for a different mixing service.
    pub fn check_service(&self, service: &str) -> Result<(), ConfigError> {
        if self.service == service {
            Ok(())
        } else {
            Err(ConfigError::ServiceMismatch {
                expected: service.to_string(),
                got: self.service.clone(),
            })
        }
    }

    /// First server of the chain, the one batches are submitted to.
    pub fn head(&self) -> Option<&MixServer> {
        self.mix_servers.first()
    }

    /// Hex BLAKE3 hash of the canonical JSON encoding.
    pub fn hash(&self) -> String {
        // serde_json emits struct fields in declaration order, which is
        // stable for this type.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(crypto::hash(&canonical))
    }
}
