//! Real-time subscription task.
//!
//! One task per open session feeds [`RelayEvent`]s into the orchestrator
//! through a bounded channel:
//!
//! - reconnects with exponential backoff (base 2 s, cap 32 s, up to one
//!   second of random jitter), any successful event resets the attempt
//!   counter;
//! - after five failed attempts in a row, falls back to polling every
//!   10 s through a cursor cell shared with the orchestrator;
//! - `NotFound` is fatal to the task: it forwards the event and ends so
//!   the orchestrator can re-register and restart it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Error;
use crate::relay::api::RelayEvent;
use crate::relay::RelayClient;

/// Cursor shared between the orchestrator (which owns catch-up polling)
/// and the fallback poller inside the subscription task.
pub type CursorCell = Arc<RwLock<Option<String>>>;

/// Reconnect and fallback tuning.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Upper bound for reconnect delays.
    pub backoff_cap: Duration,
    /// Subscribe attempts before falling back to polling.
    pub max_attempts: u32,
    /// Poll cadence in fallback mode.
    pub poll_interval: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(32),
            max_attempts: 5,
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl SubscriptionConfig {
    /// Delay before reconnect attempt number `attempt` (1-based), jittered.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(1u32 << (attempt - 1).min(16));
        let capped = exp.min(self.backoff_cap);
        capped + Duration::from_secs_f64(rand::random::<f64>())
    }
}

/// Capacity of the event channel into the orchestrator.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Spawn the subscription task for `client`.
///
/// Ends when the shutdown flag flips, the orchestrator drops the receiver,
/// the relay burns the conversation, or a fatal `NotFound` arrives.
pub fn spawn(
    client: RelayClient,
    cursor: CursorCell,
    config: SubscriptionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(mpsc::Receiver<RelayEvent>, JoinHandle<()>), Error> {
    let slot = client.acquire_subscription_slot()?;
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let _slot = slot;
        run(client, cursor, config, tx, &mut shutdown).await;
    });
    Ok((rx, handle))
}

async fn run(
    client: RelayClient,
    cursor: CursorCell,
    config: SubscriptionConfig,
    tx: mpsc::Sender<RelayEvent>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match client.open_stream().await {
            Ok(mut stream) => loop {
                let event = tokio::select! {
                    event = stream.next() => event,
                    _ = shutdown.changed() => return,
                };
                let Some(event) = event else {
                    debug!("event stream ended, reconnecting");
                    break;
                };

                attempts = 0;
                let fatal = matches!(event, RelayEvent::NotFound);
                if tx.send(event).await.is_err() || fatal {
                    return;
                }
            },
            Err(Error::NotFound) => {
                let _ = tx.send(RelayEvent::NotFound).await;
                return;
            }
            Err(e) => {
                debug!(error = %e, "subscribe attempt failed");
            }
        }

        attempts += 1;
        if attempts >= config.max_attempts {
            warn!(attempts, "subscription gave up, falling back to polling");
            poll_fallback(&client, &cursor, &config, &tx, shutdown).await;
            return;
        }

        let delay = config.backoff_delay(attempts);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Poll-only degraded mode; runs until shutdown or a terminal condition.
async fn poll_fallback(
    client: &RelayClient,
    cursor: &CursorCell,
    config: &SubscriptionConfig,
    tx: &mpsc::Sender<RelayEvent>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        let position = cursor.read().await.clone();
        match client.poll(position.as_deref()).await {
            Ok(response) => {
                if let Some(next) = response.next_cursor {
                    *cursor.write().await = Some(next);
                }
                for message in response.messages {
                    if tx.send(RelayEvent::MessageReceived(message)).await.is_err() {
                        return;
                    }
                }
                if response.burned {
                    let _ = tx.send(RelayEvent::BurnSignal).await;
                    return;
                }
            }
            Err(Error::NotFound) => {
                let _ = tx.send(RelayEvent::NotFound).await;
                return;
            }
            Err(Error::ConversationBurned) => {
                let _ = tx.send(RelayEvent::BurnSignal).await;
                return;
            }
            Err(e) => {
                debug!(error = %e, "fallback poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = SubscriptionConfig::default();

        // Jitter adds at most one second on top of the deterministic part.
        for (attempt, floor_secs) in [(1u32, 2u64), (2, 4), (3, 8), (4, 16)] {
            let delay = config.backoff_delay(attempt);
            assert!(delay >= Duration::from_secs(floor_secs));
            assert!(delay < Duration::from_secs(floor_secs + 1));
        }

        let capped = config.backoff_delay(10);
        assert!(capped >= Duration::from_secs(32));
        assert!(capped < Duration::from_secs(33));
    }
}
