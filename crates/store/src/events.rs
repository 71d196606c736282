use crate::{Error, JsonTable, Result};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use universal_types::{Event, EventStatus, TxRef};

/// Blocks the coordinator waits past an event's creation height before
/// acting, so every honest node has observed the same row.
pub const DEFAULT_FINALITY_LAG: u64 = 10;

/// The durable table of TSS events, keyed by event id.
///
/// All lifecycle writes go through this type: transitions are validated
/// against the status DAG under the table lock, so two workers racing to
/// move the same event resolve to exactly one winner.
pub struct EventStore {
    table: JsonTable<Event>,
}

impl EventStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            table: JsonTable::open(path)?,
        })
    }

    /// Insert a fresh event. Event ids are unique; re-inserting is an error.
    pub fn insert(&self, event: Event) -> Result<()> {
        let id = event.event_id.clone();
        if !self.table.insert_new(&id, event)? {
            return Err(Error::EventExists(id));
        }
        Ok(())
    }

    pub fn get(&self, event_id: &str) -> Result<Event> {
        self.table
            .get(event_id)?
            .ok_or_else(|| Error::NotFound(event_id.to_string()))
    }

    /// Move an event along the lifecycle DAG.
    ///
    /// The transition is validated against the event's *current* status
    /// under the table lock; concurrent workers cannot both win.
    pub fn update_status(
        &self,
        event_id: &str,
        new_status: EventStatus,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        self.table.try_update(event_id, |event| {
            if !event.status.can_transition(new_status) {
                return Err(Error::InvalidTransition {
                    event_id: event.event_id.clone(),
                    from: event.status,
                    to: new_status,
                });
            }
            debug!(%event_id, from = %event.status, to = %new_status, "status transition");
            event.status = new_status;
            event.status_reason = reason.clone();
            event.updated_at = unix_now();
            Ok(())
        })
    }

    /// Record the external-chain broadcast of a SIGN event and move it to
    /// `BROADCASTED` in the same write.
    pub fn set_broadcasted_tx_hash(&self, event_id: &str, tx_ref: &TxRef) -> Result<()> {
        self.table.try_update(event_id, |event| {
            if !event.status.can_transition(EventStatus::Broadcasted) {
                return Err(Error::InvalidTransition {
                    event_id: event.event_id.clone(),
                    from: event.status,
                    to: EventStatus::Broadcasted,
                });
            }
            event.status = EventStatus::Broadcasted;
            event.status_reason = "outbound broadcast submitted".to_string();
            event.broadcasted_tx_hash = Some(tx_ref.to_string());
            event.updated_at = unix_now();
            Ok(())
        })
    }

    /// Events the coordinator should act on: `PENDING`, old enough that the
    /// whole fleet has seen them, and past any reschedule delay.
    ///
    /// Sorted by `(block_number, event_id)` so every node walks the same
    /// order.
    pub fn pending_events(&self, latest_block: u64, finality_lag: u64) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .table
            .values()?
            .into_iter()
            .filter(|e| {
                e.status == EventStatus::Pending
                    && e.block_number.saturating_add(finality_lag) <= latest_block
                    && e.next_eligible_block <= latest_block
            })
            .collect();
        events.sort_by(|a, b| {
            a.block_number
                .cmp(&b.block_number)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        Ok(events)
    }

    /// Non-terminal events whose expiry height has passed.
    pub fn expired_events(&self, latest_block: u64) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .table
            .values()?
            .into_iter()
            .filter(|e| !e.is_terminal() && e.expiry_block_height <= latest_block)
            .collect();
        events.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        Ok(events)
    }

    /// Delete terminal rows whose last change is older than `retention`.
    /// Returns the number of deleted rows.
    pub fn clear_terminal_events(&self, retention: Duration) -> Result<usize> {
        let cutoff = unix_now().saturating_sub(retention.as_secs());
        let removed = self
            .table
            .retain(|e| !(e.is_terminal() && e.updated_at <= cutoff))?;
        if removed > 0 {
            info!(removed, "cleared terminal events");
        }
        Ok(removed)
    }

    /// Reclaim sessions lost to a crash: every `IN_PROGRESS` row goes back
    /// to `PENDING`. Runs once at node start, before the coordinator loop.
    pub fn reset_in_progress_to_pending(&self) -> Result<usize> {
        let reset = self.table.update_all(|event| {
            if event.status != EventStatus::InProgress {
                return false;
            }
            event.status = EventStatus::Pending;
            event.status_reason = "reset after restart".to_string();
            event.updated_at = unix_now();
            true
        })?;
        if reset > 0 {
            info!(reset, "reset in-progress events to pending");
        }
        Ok(reset)
    }

    /// Put a timed-out `IN_PROGRESS` event back to `PENDING`, delaying the
    /// next attempt until `next_eligible_block`.
    ///
    /// The event's `block_number` is bumped to the same height: the
    /// election epoch derives from it, so once enough retries push it past
    /// a rotation boundary, a different leader takes over.
    pub fn reschedule(
        &self,
        event_id: &str,
        next_eligible_block: u64,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        self.table.try_update(event_id, |event| {
            if event.status != EventStatus::InProgress {
                return Err(Error::InvalidTransition {
                    event_id: event.event_id.clone(),
                    from: event.status,
                    to: EventStatus::Pending,
                });
            }
            event.status = EventStatus::Pending;
            event.status_reason = reason.clone();
            event.block_number = event.block_number.max(next_eligible_block);
            event.next_eligible_block = next_eligible_block;
            event.updated_at = unix_now();
            Ok(())
        })
    }

    /// Total number of rows, terminal or not.
    pub fn len(&self) -> Result<usize> {
        self.table.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.table.is_empty()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
