use bytes::Bytes;

use cascade_core::wire::{OnionMsg, ServerMessage};
use cascade_services::CoordinatorError;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Shutdown
// ══════════════════════════════════════════════════════════════════════════════

/// Stop, then check the loop exited well within one wait of the phase it
/// was in.
async fn stop_promptly(c: &Coordinator) -> Result<()> {
    let started = tokio::time::Instant::now();
    c.stop()?;
    c.join().await;
    assert!(!c.is_running());
    assert!(
        started.elapsed() < ANNOUNCE,
        "shutdown took {:?}",
        started.elapsed()
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_announce_delay() -> Result<()> {
    let chain = ScriptedChain::new();
    let c = coordinator(chain.clone(), MemoryStore::new(), 1);
    let mut client = Client::connect(&c).await;
    c.start()?;

    client.wait_for_topic("newround", 1).await?;
    stop_promptly(&c).await?;

    // Negotiation never started.
    assert!(chain.negotiations().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_retry_backoff() -> Result<()> {
    let chain = ScriptedChain::failing_negotiations(usize::MAX);
    let c = coordinator(chain.clone(), MemoryStore::new(), 1);
    c.start()?;

    wait_until(|| chain.negotiations().len() == 1).await?;
    stop_promptly(&c).await?;
    assert_eq!(chain.negotiations(), vec![1]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_mix_window() -> Result<()> {
    let chain = ScriptedChain::new();
    let c = coordinator(chain.clone(), MemoryStore::new(), 1);
    let mut client = Client::connect(&c).await;
    c.start()?;

    client.wait_for_topic("mix", 1).await?;
    client.submit(&c, 1, b"unsent").await;
    stop_promptly(&c).await?;

    // The window was cut short, so the batch was never handed to the chain.
    assert!(chain.batches().is_empty());
    assert_eq!(c.intake().pending(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_round_gap() -> Result<()> {
    let chain = ScriptedChain::new();
    let store = MemoryStore::new();
    let c = coordinator(chain.clone(), store.clone(), 1);
    c.start()?;

    wait_until(|| chain.batches().len() == 1).await?;
    stop_promptly(&c).await?;

    // Round 2 was never opened.
    assert_eq!(store.saved(), vec![1]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_succeeds_exactly_once() -> Result<()> {
    let c = coordinator(ScriptedChain::new(), MemoryStore::new(), 1);
    c.start()?;

    c.stop()?;
    assert!(matches!(c.stop(), Err(CoordinatorError::ServerClosed)));
    assert!(matches!(c.stop(), Err(CoordinatorError::ServerClosed)));
    c.join().await;
    // A second join returns at once.
    c.join().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_is_single_use() -> Result<()> {
    let c = coordinator(ScriptedChain::new(), MemoryStore::new(), 1);
    c.start()?;
    assert!(matches!(c.start(), Err(CoordinatorError::AlreadyStarted)));

    c.stop()?;
    c.join().await;
    assert!(matches!(c.start(), Err(CoordinatorError::ServerClosed)));
    Ok(())
}

// ── In-flight batches ─────────────────────────────────────────────────────────

/// Chain whose batch run takes a long time.
struct SlowChain {
    inner: Arc<ScriptedChain>,
    delay: Duration,
}

#[async_trait]
impl MixChain for SlowChain {
    async fn negotiate_round(
        &self,
        members: &[MixServer],
        settings: &RoundSettings,
    ) -> Result<SignatureSet, MixnetError> {
        self.inner.negotiate_round(members, settings).await
    }

    async fn run_batch(
        &self,
        head: &MixServer,
        service: &str,
        round: Round,
        onions: Vec<Bytes>,
    ) -> Result<Vec<Bytes>, MixnetError> {
        let replies = self.inner.run_batch(head, service, round, onions).await;
        tokio::time::sleep(self.delay).await;
        replies
    }
}

/// A batch already handed to the chain finishes after the loop stops, and
/// its replies are still delivered.
#[tokio::test(start_paused = true)]
async fn test_stop_does_not_cancel_running_batch() -> Result<()> {
    let inner = ScriptedChain::new();
    let chain = Arc::new(SlowChain {
        inner: inner.clone(),
        delay: Duration::from_secs(30),
    });
    let c = coordinator(chain, MemoryStore::new(), 1);
    let mut client = Client::connect(&c).await;
    c.start()?;

    client.wait_for_topic("mix", 1).await?;
    client.submit(&c, 1, b"in-flight").await;
    wait_until(|| inner.batches().len() == 1).await?;

    c.stop()?;
    c.join().await;

    assert_eq!(
        client.wait_for_topic("reply", 1).await?,
        ServerMessage::Reply(OnionMsg {
            round: 1,
            onion: ScriptedChain::reply_for(b"in-flight"),
        })
    );
    Ok(())
}
