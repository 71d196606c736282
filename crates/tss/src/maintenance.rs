use crate::{Result, TssConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use universal_chain::{DataProvider, Voter};
use universal_store::EventStore;
use universal_types::{Event, EventStatus, ProtocolType, TxRef};

/// Periodic janitor for the event table.
///
/// The expiry sweep moves events whose expiry height has passed into their
/// terminal state — keygen-family events simply expire, SIGN events are
/// reverted onto the core chain first. The cleanup sweep garbage-collects
/// terminal rows past the retention window. Both sweeps run immediately on
/// start and tolerate individual failures: the next tick retries whatever
/// is still standing.
pub struct MaintenanceHandler {
    config: Arc<TssConfig>,
    store: Arc<EventStore>,
    provider: Arc<dyn DataProvider>,
    voter: Arc<dyn Voter>,
}

impl MaintenanceHandler {
    pub fn new(
        config: Arc<TssConfig>,
        store: Arc<EventStore>,
        provider: Arc<dyn DataProvider>,
        voter: Arc<dyn Voter>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            voter,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut expiry_tick = tokio::time::interval(self.config.maintenance_interval);
        let mut cleanup_tick = tokio::time::interval(self.config.cleanup_interval);
        expiry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("maintenance handler started");

        loop {
            tokio::select! {
                _ = expiry_tick.tick() => {
                    if let Err(e) = self.expiry_sweep().await {
                        warn!(error = %e, "expiry sweep failed");
                    }
                }
                _ = cleanup_tick.tick() => {
                    if let Err(e) = self.cleanup_sweep() {
                        warn!(error = %e, "cleanup sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("maintenance handler stopped");
    }

    /// Close out every non-terminal event whose expiry height has passed.
    pub async fn expiry_sweep(&self) -> Result<()> {
        let latest = self.provider.latest_block_num().await?;
        let expired = self.store.expired_events(latest)?;
        for event in expired {
            if let Err(e) = self.close_expired(&event, latest).await {
                // Log and move on; the event stays non-terminal and the
                // next sweep picks it up again.
                warn!(event_id = %event.event_id, error = %e, "failed to close expired event");
            }
        }
        Ok(())
    }

    /// Delete terminal rows older than the retention window.
    pub fn cleanup_sweep(&self) -> Result<usize> {
        let deleted = self.store.clear_terminal_events(self.config.retention)?;
        Ok(deleted)
    }

    async fn close_expired(&self, event: &Event, latest: u64) -> Result<()> {
        match event.protocol_type {
            ProtocolType::Keygen | ProtocolType::Keyrefresh | ProtocolType::QuorumChange => {
                self.store.update_status(
                    &event.event_id,
                    EventStatus::Expired,
                    format!("expiry height {} passed", event.expiry_block_height),
                )?;
                info!(event_id = %event.event_id, "event expired");
            }
            ProtocolType::Sign => {
                let reason = revert_reason(event);
                // For broadcast events the raw external hash rides along,
                // pinned to the height we observed the expiry at.
                let (tx_hash, block_height) = match &event.broadcasted_tx_hash {
                    Some(caip) => match caip.parse::<TxRef>() {
                        Ok(tx_ref) => (Some(tx_ref.tx_hash), latest),
                        Err(e) => {
                            debug!(event_id = %event.event_id, error = %e, "unparseable broadcast hash");
                            (None, 0)
                        }
                    },
                    None => (None, 0),
                };
                let tx_id = event.tx_id.clone().unwrap_or_else(|| event.event_id.clone());

                let vote_tx = self
                    .voter
                    .vote_outbound(&tx_id, false, tx_hash.as_deref(), block_height, &reason)
                    .await?;
                self.store
                    .update_status(&event.event_id, EventStatus::Reverted, reason)?;
                info!(event_id = %event.event_id, %vote_tx, "expired sign event reverted");
            }
        }
        Ok(())
    }
}

fn revert_reason(event: &Event) -> String {
    match event.status {
        EventStatus::Pending => "expired before signing completed".to_string(),
        EventStatus::InProgress => "expired during TSS signing".to_string(),
        EventStatus::Broadcasted => {
            "expired after broadcast, no confirmations received".to_string()
        }
        EventStatus::Failed => format!("signing failed: {}", event.status_reason),
        // Terminal rows never reach the sweep.
        other => format!("expired in status {other}"),
    }
}
