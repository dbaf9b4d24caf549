//! Round settings negotiation: one attempt to get every chain member's
//! signature on the settings for a round.
//!
//! Retrying is the round loop's business. An attempt either returns a
//! complete signature set or an error; it never returns a partial set.

use std::sync::Arc;
use std::time::Duration;

use cascade_core::chain::MixServer;
use cascade_core::round::{RoundSettings, SignatureSet};

use crate::lifecycle::ShutdownListener;
use crate::mixnet::{MixChain, MixnetError};

pub struct RoundSettingsNegotiator {
    chain: Arc<dyn MixChain>,
    timeout: Option<Duration>,
}

impl RoundSettingsNegotiator {
    /// `timeout` bounds the whole attempt, across all members.
    pub fn new(chain: Arc<dyn MixChain>, timeout: Option<Duration>) -> Self {
        Self { chain, timeout }
    }

    /// Run one negotiation attempt.
    ///
    /// Returns [`MixnetError::Cancelled`] if shutdown arrives while the
    /// chain is being contacted.
    pub async fn negotiate(
        &self,
        shutdown: &mut ShutdownListener,
        members: &[MixServer],
        settings: &RoundSettings,
    ) -> Result<SignatureSet, MixnetError> {
        if members.is_empty() {
            return Err(MixnetError::EmptyChain);
        }

        let call = async {
            let fut = self.chain.negotiate_round(members, settings);
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(MixnetError::Timeout {
                        server: members
                            .iter()
                            .map(|m| m.address.as_str())
                            .collect::<Vec<_>>()
                            .join(","),
                    }),
                },
                None => fut.await,
            }
        };

        let signatures = shutdown.guard(call).await.ok_or(MixnetError::Cancelled)??;
        if signatures.len() != members.len() {
            return Err(MixnetError::SignatureCount {
                expected: members.len(),
                got: signatures.len(),
            });
        }

        tracing::debug!(
            round = settings.round,
            members = members.len(),
            "round settings signed"
        );
        Ok(signatures)
    }
}
