//! Where the coordinator learns the current mix chain.
//!
//! The chain may change between rounds; the round loop asks for the
//! current one each time it opens a round and uses that snapshot for the
//! whole round.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use cascade_core::chain::ChainConfig;
use cascade_core::config::ConfigError;

pub trait ConfigSource: Send + Sync {
    /// The current chain and its hash.
    fn current_config(&self) -> (Arc<ChainConfig>, String);
}

/// Chain config held in memory, replaceable at runtime.
pub struct StaticConfigSource {
    current: RwLock<(Arc<ChainConfig>, String)>,
}

impl StaticConfigSource {
    pub fn new(config: ChainConfig) -> Self {
        let hash = config.hash();
        Self {
            current: RwLock::new((Arc::new(config), hash)),
        }
    }

    /// Read a chain document from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = ChainConfig::from_file(path)?;
        tracing::info!(
            path = %path.display(),
            servers = config.mix_servers.len(),
            "loaded mix chain config"
        );
        Ok(Self::new(config))
    }

    /// Re-read `path` and swap it in. On error the current chain is kept.
    pub fn reload(&self, path: &Path) -> Result<String, ConfigError> {
        let config = ChainConfig::from_file(path)?;
        Ok(self.replace(config))
    }

    /// Swap in a new chain. Takes effect at the next round.
    pub fn replace(&self, config: ChainConfig) -> String {
        let hash = config.hash();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = (Arc::new(config), hash.clone());
        tracing::info!(hash = %hash, "mix chain config replaced");
        hash
    }
}

impl ConfigSource for StaticConfigSource {
    fn current_config(&self) -> (Arc<ChainConfig>, String) {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        (Arc::clone(&current.0), current.1.clone())
    }
}
