//! Batch execution: submit a drained batch to the chain head and route
//! each reply back to the connection that sent the matching onion.
//!
//! Execution runs on its own task so the next round can open while the
//! chain is still mixing. Shutdown does not cancel it.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::task::{JoinHandle, JoinSet};

use cascade_core::chain::MixServer;
use cascade_core::round::Round;
use cascade_core::wire::{OnionMsg, RoundError, ServerMessage};

use crate::hub::{Connection, Hub};
use crate::intake::Submission;
use crate::mixnet::{MixChain, MixnetError};

/// Outcome of dispatching one round's replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub round: Round,
    pub delivered: usize,
    pub failed: usize,
}

pub struct MixExecutor {
    chain: Arc<dyn MixChain>,
    hub: Hub,
}

impl MixExecutor {
    pub fn new(chain: Arc<dyn MixChain>, hub: Hub) -> Self {
        Self { chain, hub }
    }

    /// Run [`execute`](Self::execute) on a new task.
    pub fn spawn(
        self: &Arc<Self>,
        head: MixServer,
        service: String,
        round: Round,
        batch: Vec<Submission>,
    ) -> JoinHandle<Result<DispatchReport, MixnetError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.execute(&head, &service, round, batch).await })
    }

    /// Mix `batch` through the chain and deliver `reply[i]` to the sender
    /// of `batch[i]`.
    ///
    /// On chain failure every connected client gets a `server error`
    /// notice for `round` and no replies are sent. An empty batch still
    /// goes through the chain.
    pub async fn execute(
        &self,
        head: &MixServer,
        service: &str,
        round: Round,
        batch: Vec<Submission>,
    ) -> Result<DispatchReport, MixnetError> {
        let (onions, senders): (Vec<Bytes>, Vec<Arc<dyn Connection>>) =
            batch.into_iter().map(|s| (s.onion, s.sender)).unzip();
        let count = onions.len();

        let started = Instant::now();
        let result = self
            .chain
            .run_batch(head, service, round, onions)
            .await
            .and_then(|replies| {
                if replies.len() == count {
                    Ok(replies)
                } else {
                    Err(MixnetError::ReplyCount {
                        expected: count,
                        got: replies.len(),
                    })
                }
            });

        let replies = match result {
            Ok(replies) => replies,
            Err(e) => {
                tracing::error!(round, onions = count, error = %e, "mix chain failed to run round");
                self.hub
                    .broadcast(ServerMessage::Error(RoundError::server_error(round)))
                    .await;
                return Err(e);
            }
        };
        tracing::info!(
            round,
            onions = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "round mixed"
        );

        let report = dispatch(round, senders, replies).await;
        if report.failed > 0 {
            tracing::warn!(round, failed = report.failed, "some replies were not delivered");
        }
        Ok(report)
    }
}

/// Send `replies[i]` to `senders[i]`, one task per reply.
async fn dispatch(
    round: Round,
    senders: Vec<Arc<dyn Connection>>,
    replies: Vec<Bytes>,
) -> DispatchReport {
    let mut tasks = JoinSet::new();
    for (sender, onion) in senders.into_iter().zip(replies) {
        tasks.spawn(async move {
            let msg = ServerMessage::Reply(OnionMsg { round, onion });
            match sender.send(msg).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(conn = sender.id(), round, error = %e, "reply not delivered");
                    false
                }
            }
        });
    }

    let mut report = DispatchReport {
        round,
        delivered: 0,
        failed: 0,
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => report.delivered += 1,
            Ok(false) => report.failed += 1,
            Err(e) => {
                tracing::warn!(round, error = %e, "reply task panicked");
                report.failed += 1;
            }
        }
    }
    report
}
