use crate::{Error, Outbox, Result, TssConfig, election};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use universal_chain::DataProvider;
use universal_dkls::{SetupParams, SigningProtocol};
use universal_store::EventStore;
use universal_types::{Envelope, Event, EventStatus, ProtocolType, UniversalValidator};

/// Drives the leader side of the TSS handshake.
///
/// Every poll tick, the coordinator walks the fresh `PENDING` events,
/// computes the deterministic leader for each, and — when that leader is
/// this node — claims the event, broadcasts the setup, gathers acks and
/// dispatches begin. Non-led events are left alone; the session manager
/// picks them up when the real leader's setup arrives.
pub struct Coordinator {
    config: Arc<TssConfig>,
    store: Arc<EventStore>,
    provider: Arc<dyn DataProvider>,
    protocol: Arc<dyn SigningProtocol>,
    outbox: Arc<dyn Outbox>,
    /// Ack routing for setups in flight, keyed by event id
    pending_acks: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl Coordinator {
    pub fn new(
        config: Arc<TssConfig>,
        store: Arc<EventStore>,
        provider: Arc<dyn DataProvider>,
        protocol: Arc<dyn SigningProtocol>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            protocol,
            outbox,
            pending_acks: DashMap::new(),
        }
    }

    /// Poll loop. Cooperative: shutdown is observed between ticks, so a
    /// setup in flight is finished (or times out) before the loop exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(validator = %self.config.validator_address, "coordinator started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "coordinator tick failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("coordinator stopped");
    }

    /// One poll iteration: fetch the head, walk eligible pending events,
    /// lead the ones this node is elected for.
    pub async fn tick(&self) -> Result<()> {
        let latest = self.provider.latest_block_num().await?;
        let events = self
            .store
            .pending_events(latest, self.config.finality_lag)?;
        if events.is_empty() {
            return Ok(());
        }
        let validators = self.provider.validator_set().await?;

        for event in events {
            let eligible = election::eligible_participants(event.protocol_type, &validators);
            let Some(leader) =
                election::elect_leader(&eligible, event.block_number, self.config.coordinator_range)
            else {
                debug!(event_id = %event.event_id, "no eligible validators, skipping");
                continue;
            };
            if leader.validator_address != self.config.validator_address {
                trace!(
                    event_id = %event.event_id,
                    leader = %leader.validator_address,
                    "not the leader for this epoch"
                );
                continue;
            }

            if let Err(e) = self.lead_event(&event, &eligible, latest).await {
                warn!(event_id = %event.event_id, error = %e, "setup phase failed");
                let _ = self.store.reschedule(
                    &event.event_id,
                    latest + self.config.session_expiry_block_delay,
                    format!("setup failed: {e}"),
                );
            }
        }
        Ok(())
    }

    /// Route an incoming ack envelope to the setup gathering it, if any.
    /// Acks arriving after begin was dispatched are discarded.
    pub fn handle_ack(&self, event_id: &str, from: &str) {
        match self.pending_acks.get(event_id) {
            Some(tx) => {
                let _ = tx.send(from.to_string());
            }
            None => debug!(%event_id, %from, "ack without a pending setup, discarding"),
        }
    }

    async fn lead_event(
        &self,
        event: &Event,
        eligible: &[UniversalValidator],
        latest: u64,
    ) -> Result<()> {
        let event_id = event.event_id.clone();
        // Claim the event; a concurrent transition means someone else got
        // here first and the error just skips this round.
        self.store
            .update_status(&event_id, EventStatus::InProgress, "leading session setup")?;

        let (participants, quorum) = self.choose_participants(event, eligible);
        if participants.is_empty() {
            return Err(Error::NoEligibleValidators(event_id));
        }
        let setup = self.build_setup(event, &participants, quorum).await?;

        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        self.pending_acks.insert(event_id.clone(), ack_tx);

        let envelope = Envelope::setup(event_id.clone(), setup, participants.clone());
        for participant in &participants {
            // Self-addressed setups loop back through the local dispatch
            // path inside the outbox; the bytes on both paths are the same.
            if let Err(e) = self.outbox.send_to(participant, &envelope).await {
                warn!(%participant, error = %e, "setup delivery failed");
            }
        }

        let mut acked: HashSet<String> = HashSet::new();
        let deadline = tokio::time::sleep(self.config.setup_timeout);
        tokio::pin!(deadline);
        while acked.len() < participants.len() {
            tokio::select! {
                () = &mut deadline => break,
                maybe = ack_rx.recv() => match maybe {
                    Some(from) => {
                        if participants.contains(&from) {
                            acked.insert(from);
                        }
                    }
                    None => break,
                },
            }
        }
        self.pending_acks.remove(&event_id);

        if acked.len() < quorum {
            warn!(
                %event_id,
                acks = acked.len(),
                quorum,
                "setup timed out below quorum, rescheduling"
            );
            self.store.reschedule(
                &event_id,
                latest + self.config.session_expiry_block_delay,
                "setup timed out below ack quorum",
            )?;
            return Ok(());
        }

        let begin = Envelope::begin(event_id.clone());
        for participant in &participants {
            if let Err(e) = self.outbox.send_to(participant, &begin).await {
                warn!(%participant, error = %e, "begin delivery failed");
            }
        }
        info!(%event_id, participants = participants.len(), acks = acked.len(), "session begun");
        Ok(())
    }

    /// Participant set and begin quorum for an event.
    ///
    /// Keygen-family sessions need every eligible validator to end up with
    /// a share, so the quorum is the full set. SIGN samples a subset and
    /// can begin at the session threshold.
    fn choose_participants(
        &self,
        event: &Event,
        eligible: &[UniversalValidator],
    ) -> (Vec<String>, usize) {
        match event.protocol_type {
            ProtocolType::Sign => {
                let participants =
                    election::select_sign_participants(eligible, self.config.threshold_percent);
                let quorum = election::session_threshold(participants.len());
                (participants, quorum)
            }
            _ => {
                let participants: Vec<String> = eligible
                    .iter()
                    .map(|v| v.validator_address.clone())
                    .collect();
                let quorum = participants.len();
                (participants, quorum)
            }
        }
    }

    async fn build_setup(
        &self,
        event: &Event,
        participants: &[String],
        threshold: usize,
    ) -> Result<Vec<u8>> {
        let (key_id, message_hash, derivation_path) = match event.protocol_type {
            ProtocolType::Sign => {
                let data = event.sign_data()?;
                let digest = hex::decode(&data.message_hash).map_err(|e| {
                    Error::Types(universal_types::Error::EventData(format!(
                        "message hash is not hex: {e}"
                    )))
                })?;
                (data.key_id, Some(digest), data.derivation_path)
            }
            // A fresh keygen lets the protocol mint the key id.
            ProtocolType::Keygen => (String::new(), None, String::new()),
            ProtocolType::Keyrefresh | ProtocolType::QuorumChange => {
                let current = self.provider.current_key_id().await?.unwrap_or_default();
                (current, None, String::new())
            }
        };

        Ok(self.protocol.build_setup(&SetupParams {
            event_id: &event.event_id,
            protocol: event.protocol_type,
            participants,
            threshold,
            key_id: &key_id,
            message_hash: message_hash.as_deref(),
            derivation_path: &derivation_path,
        })?)
    }
}
