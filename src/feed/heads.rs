//! Head ticks
//!
//! Polls the node for the block number and pushes a unit signal whenever it
//! advances. The channel is capacity 1 and sends never block: if a consumer
//! is still busy with the previous head, the tick is dropped - everything
//! downstream is level-triggered, so the next tick carries the same
//! information.

use alloy_provider::{Provider, RootProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn watch_heads(
    provider: Arc<RootProvider>,
    tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_num: u64 = 0;
    let mut last_at = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = poll.tick() => {
                match provider.get_block_number().await {
                    Ok(n) if n > last_num => {
                        info!(
                            block = n,
                            gap_ms = last_at.elapsed().as_millis() as u64,
                            "new head",
                        );
                        last_num = n;
                        last_at = Instant::now();
                        let _ = tx.try_send(());
                    }
                    Ok(_) => {}
                    // transient: the next poll retries, nothing to surface
                    Err(e) => warn!("head poll failed: {e}"),
                }
            }
        }
    }
}
