use crate::{Outbox, Result, TssConfig};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use universal_chain::{Chains, DataProvider, Voter};
use universal_dkls::{ProtocolSession, Recipient, SessionOutcome, SigningProtocol, StepResult};
use universal_keyshare::KeyshareVault;
use universal_store::EventStore;
use universal_types::{Envelope, EventStatus, TxRef, ValidatorAddress};

/// Step messages buffered per event while the setup is still in flight
const MAX_QUEUED_STEPS: usize = 256;

enum SessionInput {
    Begin,
    Step { from: String, payload: Vec<u8> },
}

/// Owns the live protocol sessions of this node, one task per event.
///
/// Incoming envelopes may arrive in any order across peers: step messages
/// that beat their setup are queued per event and drained in arrival order
/// once the session exists. Terminal outcomes land in the vault (keygen
/// family), the chain driver (sign) and always in the event store.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<TssConfig>,
    store: Arc<EventStore>,
    vault: Arc<KeyshareVault>,
    provider: Arc<dyn DataProvider>,
    voter: Arc<dyn Voter>,
    chains: Chains,
    protocol: Arc<dyn SigningProtocol>,
    outbox: Arc<dyn Outbox>,
    /// One live session per event id
    live: DashMap<String, mpsc::UnboundedSender<SessionInput>>,
    /// Steps that arrived before their setup
    queued: DashMap<String, Vec<(String, Vec<u8>)>>,
}

struct SessionContext {
    event_id: String,
    participants: Vec<ValidatorAddress>,
}

impl SessionManager {
    pub fn new(
        config: Arc<TssConfig>,
        store: Arc<EventStore>,
        vault: Arc<KeyshareVault>,
        provider: Arc<dyn DataProvider>,
        voter: Arc<dyn Voter>,
        chains: Chains,
        protocol: Arc<dyn SigningProtocol>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                vault,
                provider,
                voter,
                chains,
                protocol,
                outbox,
                live: DashMap::new(),
                queued: DashMap::new(),
            }),
        }
    }

    /// Number of sessions currently running on this node
    pub fn live_sessions(&self) -> usize {
        self.inner.live.len()
    }

    /// A leader's setup arrived. Creates the session (at most one per
    /// event), drains any queued steps, and acks back to the sender.
    ///
    /// Setups for unknown or settled events are discarded; the leader
    /// treats the missing ack as a timeout.
    pub async fn handle_setup(
        &self,
        from: &str,
        event_id: &str,
        setup: &[u8],
        participants: &[ValidatorAddress],
    ) -> Result<()> {
        let inner = &self.inner;

        if inner.live.contains_key(event_id) {
            debug!(%event_id, "duplicate setup for a live session, re-acking");
            self.ack(from, event_id).await;
            return Ok(());
        }

        let event = match inner.store.get(event_id) {
            Ok(event) => event,
            Err(universal_store::Error::NotFound(_)) => {
                warn!(%event_id, %from, "setup for unknown event, discarding");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !matches!(event.status, EventStatus::Pending | EventStatus::InProgress) {
            debug!(%event_id, status = %event.status, "setup for settled event, discarding");
            return Ok(());
        }
        if !participants
            .iter()
            .any(|p| *p == inner.config.validator_address)
        {
            debug!(%event_id, "not selected for this session, discarding setup");
            return Ok(());
        }

        let session = match inner.protocol.new_session(
            &inner.config.validator_address,
            setup,
            participants,
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!(%event_id, error = %e, "protocol rejected setup, discarding");
                return Ok(());
            }
        };

        // Participant-side claim; the leader already moved its own copy.
        if event.status == EventStatus::Pending {
            if let Err(e) =
                inner
                    .store
                    .update_status(event_id, EventStatus::InProgress, "joined session")
            {
                debug!(%event_id, error = %e, "lost the claim race");
            }
        }

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        inner.live.insert(event_id.to_string(), input_tx.clone());

        if let Some((_, steps)) = inner.queued.remove(event_id) {
            debug!(%event_id, queued = steps.len(), "draining queued steps");
            for (step_from, payload) in steps {
                let _ = input_tx.send(SessionInput::Step {
                    from: step_from,
                    payload,
                });
            }
        }

        let context = SessionContext {
            event_id: event_id.to_string(),
            participants: participants.to_vec(),
        };
        tokio::spawn(run_session(Arc::clone(inner), context, session, input_rx));

        self.ack(from, event_id).await;
        info!(%event_id, %from, participants = participants.len(), "session created");
        Ok(())
    }

    /// The leader's begin arrived: start driving the protocol.
    ///
    /// Begin always follows this node's own ack, so a missing session means
    /// the session already settled (or expired) and the begin is stale.
    pub fn handle_begin(&self, event_id: &str) {
        match self.inner.live.get(event_id) {
            Some(tx) => {
                let _ = tx.send(SessionInput::Begin);
            }
            None => debug!(%event_id, "begin without a live session, discarding"),
        }
    }

    /// A protocol step arrived, possibly before its setup.
    pub fn handle_step(&self, from: &str, event_id: &str, payload: Vec<u8>) {
        if let Some(tx) = self.inner.live.get(event_id) {
            let _ = tx.send(SessionInput::Step {
                from: from.to_string(),
                payload,
            });
            return;
        }

        let mut queue = self.inner.queued.entry(event_id.to_string()).or_default();
        if queue.len() >= MAX_QUEUED_STEPS {
            warn!(%event_id, "step queue full, dropping message");
            return;
        }
        debug!(%event_id, %from, "queueing step ahead of setup");
        queue.push((from.to_string(), payload));
    }

    /// Drop every live session without touching event rows. The restart
    /// reset reclaims the events.
    pub fn shutdown(&self) {
        self.inner.live.clear();
        self.inner.queued.clear();
    }

    async fn ack(&self, to: &str, event_id: &str) {
        let ack = Envelope::ack(event_id);
        if let Err(e) = self.inner.outbox.send_to(to, &ack).await {
            // The leader treats a lost ack as a setup timeout.
            warn!(%event_id, leader = %to, error = %e, "ack delivery failed");
        }
    }
}

/// Drive one session to a terminal state.
///
/// The per-session DKLS state is owned by this task alone; every await
/// point between inputs doubles as the inactivity clock.
async fn run_session(
    inner: Arc<Inner>,
    context: SessionContext,
    mut session: Box<dyn ProtocolSession>,
    mut input_rx: mpsc::UnboundedReceiver<SessionInput>,
) {
    let event_id = context.event_id.clone();

    loop {
        let input = match tokio::time::timeout(inner.config.session_expiry, input_rx.recv()).await
        {
            Err(_) => {
                expire_session(&inner, &event_id).await;
                break;
            }
            Ok(None) => break, // manager shut down
            Ok(Some(input)) => input,
        };

        let result = match input {
            SessionInput::Begin => session.begin(),
            SessionInput::Step { ref from, ref payload } => session.step(from, payload),
        };

        match result {
            Ok(StepResult { outgoing, outcome }) => {
                route_outgoing(&inner, &context, outgoing).await;
                if let Some(outcome) = outcome {
                    if let Err(e) = complete_session(&inner, &event_id, outcome).await {
                        warn!(%event_id, error = %e, "session completion failed");
                        let _ = inner.store.update_status(
                            &event_id,
                            EventStatus::Failed,
                            format!("completion failed: {e}"),
                        );
                    }
                    break;
                }
            }
            // Messages from strangers or with garbage payloads are the
            // sender's problem, not the session's.
            Err(
                e @ (universal_dkls::Error::UnknownParticipant(_)
                | universal_dkls::Error::MalformedStep(_)),
            ) => {
                warn!(%event_id, error = %e, "discarding bad step message");
            }
            Err(e) => {
                warn!(%event_id, error = %e, "protocol step failed");
                let _ = inner.store.update_status(
                    &event_id,
                    EventStatus::Failed,
                    format!("protocol failure: {e}"),
                );
                break;
            }
        }
    }

    inner.live.remove(&event_id);
    inner.queued.remove(&event_id);
}

async fn route_outgoing(
    inner: &Inner,
    context: &SessionContext,
    outgoing: Vec<universal_dkls::OutgoingMessage>,
) {
    for message in outgoing {
        let envelope = Envelope::step(context.event_id.clone(), message.payload);
        match message.recipient {
            Recipient::Broadcast => {
                for participant in &context.participants {
                    if *participant == inner.config.validator_address {
                        continue;
                    }
                    if let Err(e) = inner.outbox.send_to(participant, &envelope).await {
                        warn!(%participant, error = %e, "step delivery failed");
                    }
                }
            }
            Recipient::Peer(participant) => {
                if let Err(e) = inner.outbox.send_to(&participant, &envelope).await {
                    warn!(%participant, error = %e, "step delivery failed");
                }
            }
        }
    }
}

/// Session went quiet past the expiry window: put the event back to
/// `PENDING` with a delayed retry so a later epoch elects a fresh leader.
async fn expire_session(inner: &Inner, event_id: &str) {
    let latest = match inner.provider.latest_block_num().await {
        Ok(latest) => latest,
        Err(e) => {
            warn!(%event_id, error = %e, "head unavailable during expiry");
            0
        }
    };
    match inner.store.reschedule(
        event_id,
        latest + inner.config.session_expiry_block_delay,
        "session expired: no activity within the expiry window",
    ) {
        Ok(()) => info!(%event_id, "session expired, event rescheduled"),
        Err(e) => debug!(%event_id, error = %e, "session expired on a settled event"),
    }
}

async fn complete_session(
    inner: &Inner,
    event_id: &str,
    outcome: SessionOutcome,
) -> Result<()> {
    match outcome {
        SessionOutcome::Keyshare {
            key_id,
            public_key,
            share,
        } => {
            inner.vault.store(&key_id, &share)?;
            inner.store.update_status(
                event_id,
                EventStatus::Completed,
                format!("keyshare {key_id} stored"),
            )?;
            // The vote is best-effort here; the chain re-requests reports
            // it is missing.
            if let Err(e) = inner
                .voter
                .vote_tss_key_process(&public_key, &key_id, event_id)
                .await
            {
                warn!(%event_id, error = %e, "key process vote failed");
            }
            info!(%event_id, %key_id, "keygen session completed");
        }
        SessionOutcome::Signature { signature } => {
            let event = inner.store.get(event_id)?;
            let data = event.sign_data()?;
            let driver = inner.chains.get(&data.chain_id)?;
            let tx_hash = driver.submit_signed(&event.event_data, &signature).await?;
            inner
                .store
                .set_broadcasted_tx_hash(event_id, &TxRef::new(data.chain_id.clone(), tx_hash.clone()))?;
            info!(%event_id, chain = %data.chain_id, %tx_hash, "signed outbound broadcast");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;
    use universal_chain::testing::{MockChain, MockDriver, StaticSigner, validator};
    use universal_chain::{AuthzVoter, TxBroadcaster, VoteMsg};
    use universal_dkls::{EchoProtocol, SetupParams};
    use universal_types::{Event, MessageKind, ProtocolType, SignData, ValidatorStatus};

    #[derive(Default)]
    struct CollectingOutbox {
        sent: Mutex<Vec<(String, Envelope)>>,
    }

    impl CollectingOutbox {
        fn sent(&self) -> Vec<(String, Envelope)> {
            self.sent.lock().clone()
        }

        fn acks_to(&self, validator: &str) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|(to, e)| to == validator && e.kind == MessageKind::Ack)
                .count()
        }
    }

    #[async_trait]
    impl Outbox for CollectingOutbox {
        async fn send_to(&self, validator: &str, envelope: &Envelope) -> Result<()> {
            self.sent
                .lock()
                .push((validator.to_string(), envelope.clone()));
            Ok(())
        }
    }

    struct Fixture {
        manager: SessionManager,
        store: Arc<EventStore>,
        vault: Arc<KeyshareVault>,
        chain: Arc<MockChain>,
        outbox: Arc<CollectingOutbox>,
        _dir: tempfile::TempDir,
    }

    fn fixture(me: &str, session_expiry: Duration) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(EventStore::open(dir.path().join("events.json")).unwrap());
        let vault = Arc::new(KeyshareVault::open(dir.path().join("vault"), "pw").unwrap());
        let chain = Arc::new(MockChain::new());
        chain.set_validators(vec![
            validator("uv1a", ValidatorStatus::Active),
            validator("uv1b", ValidatorStatus::Active),
        ]);
        let outbox = Arc::new(CollectingOutbox::default());
        let voter = Arc::new(AuthzVoter::new(
            Arc::new(StaticSigner::new("uvhot1", me)),
            Arc::clone(&chain) as Arc<dyn TxBroadcaster>,
        ));
        let chains = Chains::new();
        chains.register(Arc::new(MockDriver::new("eip155:1")));

        let mut config = TssConfig::new(me);
        config.session_expiry = session_expiry;

        let manager = SessionManager::new(
            Arc::new(config),
            Arc::clone(&store),
            Arc::clone(&vault),
            Arc::clone(&chain) as Arc<dyn DataProvider>,
            voter,
            chains,
            Arc::new(EchoProtocol),
            Arc::clone(&outbox) as Arc<dyn Outbox>,
        );
        Fixture {
            manager,
            store,
            vault,
            chain,
            outbox,
            _dir: dir,
        }
    }

    fn participants() -> Vec<String> {
        vec!["uv1a".to_string(), "uv1b".to_string()]
    }

    fn keygen_setup(event_id: &str) -> Vec<u8> {
        use universal_dkls::SigningProtocol as _;
        let participants = participants();
        EchoProtocol
            .build_setup(&SetupParams {
                event_id,
                protocol: ProtocolType::Keygen,
                participants: &participants,
                threshold: 2,
                key_id: "tss-test",
                message_hash: None,
                derivation_path: "",
            })
            .unwrap()
    }

    /// The peer's step message for a given session, computed out of band.
    fn peer_contribution(event_id: &str, peer: &str) -> Vec<u8> {
        use universal_dkls::SigningProtocol as _;
        let setup = keygen_setup(event_id);
        let mut session = EchoProtocol
            .new_session(peer, &setup, &participants())
            .unwrap();
        session.begin().unwrap().outgoing.remove(0).payload
    }

    fn pending_keygen(id: &str) -> Event {
        Event::new(id, 100, ProtocolType::Keygen, 10_000, Vec::new())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn setup_creates_session_and_acks_the_leader() {
        let f = fixture("uv1b", Duration::from_secs(60));
        f.store.insert(pending_keygen("evt-1")).unwrap();

        f.manager
            .handle_setup("uv1a", "evt-1", &keygen_setup("evt-1"), &participants())
            .await
            .unwrap();

        assert_eq!(f.manager.live_sessions(), 1);
        assert_eq!(f.outbox.acks_to("uv1a"), 1);
        assert_eq!(
            f.store.get("evt-1").unwrap().status,
            EventStatus::InProgress
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_or_settled_events_are_discarded() {
        let f = fixture("uv1b", Duration::from_secs(60));

        // Unknown event: no session, no ack.
        f.manager
            .handle_setup("uv1a", "ghost", &keygen_setup("ghost"), &participants())
            .await
            .unwrap();
        assert_eq!(f.manager.live_sessions(), 0);
        assert_eq!(f.outbox.acks_to("uv1a"), 0);

        // Terminal event: same.
        f.store.insert(pending_keygen("evt-done")).unwrap();
        f.store
            .update_status("evt-done", EventStatus::InProgress, "")
            .unwrap();
        f.store
            .update_status("evt-done", EventStatus::Completed, "")
            .unwrap();
        f.manager
            .handle_setup(
                "uv1a",
                "evt-done",
                &keygen_setup("evt-done"),
                &participants(),
            )
            .await
            .unwrap();
        assert_eq!(f.manager.live_sessions(), 0);
        assert_eq!(f.outbox.acks_to("uv1a"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_setup_reacks_without_a_second_session() {
        let f = fixture("uv1b", Duration::from_secs(60));
        f.store.insert(pending_keygen("evt-1")).unwrap();

        let setup = keygen_setup("evt-1");
        f.manager
            .handle_setup("uv1a", "evt-1", &setup, &participants())
            .await
            .unwrap();
        f.manager
            .handle_setup("uv1a", "evt-1", &setup, &participants())
            .await
            .unwrap();

        assert_eq!(f.manager.live_sessions(), 1);
        assert_eq!(f.outbox.acks_to("uv1a"), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_keygen_completes_and_stores_the_share() {
        let f = fixture("uv1b", Duration::from_secs(60));
        f.store.insert(pending_keygen("evt-1")).unwrap();

        f.manager
            .handle_setup("uv1a", "evt-1", &keygen_setup("evt-1"), &participants())
            .await
            .unwrap();
        f.manager.handle_begin("evt-1");
        f.manager
            .handle_step("uv1a", "evt-1", peer_contribution("evt-1", "uv1a"));
        settle().await;

        let event = f.store.get("evt-1").unwrap();
        assert_eq!(event.status, EventStatus::Completed);
        assert!(f.vault.exists("tss-test").unwrap());
        assert_eq!(f.manager.live_sessions(), 0);

        let votes = f.chain.votes();
        assert_eq!(votes.len(), 1);
        assert!(matches!(
            &votes[0],
            VoteMsg::VoteTssKeyProcess { key_id, process_id, .. }
                if key_id == "tss-test" && process_id == "evt-1"
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn steps_ahead_of_setup_are_queued_and_drained() {
        let f = fixture("uv1b", Duration::from_secs(60));
        f.store.insert(pending_keygen("evt-1")).unwrap();

        // Step arrives first; there is nothing to apply it to yet.
        f.manager
            .handle_step("uv1a", "evt-1", peer_contribution("evt-1", "uv1a"));
        assert_eq!(f.manager.live_sessions(), 0);

        // Setup lands: the queued step drains, begin completes the run.
        f.manager
            .handle_setup("uv1a", "evt-1", &keygen_setup("evt-1"), &participants())
            .await
            .unwrap();
        f.manager.handle_begin("evt-1");
        settle().await;

        assert_eq!(f.store.get("evt-1").unwrap().status, EventStatus::Completed);
        assert!(f.vault.exists("tss-test").unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quiet_sessions_expire_and_reschedule() {
        let f = fixture("uv1b", Duration::from_millis(100));
        f.chain.set_latest_block(200);
        f.store.insert(pending_keygen("evt-1")).unwrap();

        f.manager
            .handle_setup("uv1a", "evt-1", &keygen_setup("evt-1"), &participants())
            .await
            .unwrap();
        f.manager.handle_begin("evt-1");
        // No peer step ever arrives.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let event = f.store.get("evt-1").unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.next_eligible_block, 210);
        assert_eq!(event.block_number, 210, "epoch rotates on retry");
        assert_eq!(f.manager.live_sessions(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sign_completion_broadcasts_through_the_chain_driver() {
        let f = fixture("uv1b", Duration::from_secs(60));

        let data = SignData {
            key_id: "tss-test".into(),
            message_hash: "ab".repeat(32),
            derivation_path: String::new(),
            chain_id: "eip155:1".into(),
        };
        let mut event = Event::new("sign-1", 100, ProtocolType::Sign, 10_000, data.to_bytes());
        event.tx_id = Some("42".into());
        f.store.insert(event).unwrap();

        use universal_dkls::SigningProtocol as _;
        let participants = participants();
        let setup = EchoProtocol
            .build_setup(&SetupParams {
                event_id: "sign-1",
                protocol: ProtocolType::Sign,
                participants: &participants,
                threshold: 2,
                key_id: "tss-test",
                message_hash: Some(&[0xab; 32]),
                derivation_path: "",
            })
            .unwrap();

        f.manager
            .handle_setup("uv1a", "sign-1", &setup, &participants)
            .await
            .unwrap();
        f.manager.handle_begin("sign-1");

        let mut peer = EchoProtocol
            .new_session("uv1a", &setup, &participants)
            .unwrap();
        let contribution = peer.begin().unwrap().outgoing.remove(0).payload;
        f.manager.handle_step("uv1a", "sign-1", contribution);
        settle().await;

        let event = f.store.get("sign-1").unwrap();
        assert_eq!(event.status, EventStatus::Broadcasted);
        let caip = event.broadcasted_tx_hash.unwrap();
        let tx_ref: TxRef = caip.parse().unwrap();
        assert_eq!(tx_ref.chain_id, "eip155:1");
        assert!(tx_ref.tx_hash.starts_with("0x"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_steps_are_discarded_without_killing_the_session() {
        let f = fixture("uv1b", Duration::from_secs(60));
        f.store.insert(pending_keygen("evt-1")).unwrap();

        f.manager
            .handle_setup("uv1a", "evt-1", &keygen_setup("evt-1"), &participants())
            .await
            .unwrap();
        f.manager.handle_begin("evt-1");

        // Stranger and garbage payloads are dropped...
        f.manager.handle_step("uv1zzz", "evt-1", vec![0u8; 32]);
        f.manager.handle_step("uv1a", "evt-1", vec![1, 2, 3]);
        settle().await;
        assert_eq!(f.manager.live_sessions(), 1);

        // ...and the real step still completes the session.
        f.manager
            .handle_step("uv1a", "evt-1", peer_contribution("evt-1", "uv1a"));
        settle().await;
        assert_eq!(f.store.get("evt-1").unwrap().status, EventStatus::Completed);
    }
}
