//! Multi-node fleet scenarios: three client nodes wired through an
//! in-memory router, sharing one mock core chain, each with its own event
//! store and keyshare vault.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use universal_chain::testing::{MockChain, MockDriver, StaticSigner, validator};
use universal_chain::{AuthzVoter, Chains, DataProvider, TxBroadcaster, VoteMsg, Voter};
use universal_dkls::EchoProtocol;
use universal_keyshare::KeyshareVault;
use universal_store::EventStore;
use universal_tss::{
    Coordinator, Error, MaintenanceHandler, Outbox, Result, SessionManager, TssConfig,
};
use universal_types::{
    Envelope, Event, EventStatus, MessageKind, ProtocolType, SignData, ValidatorStatus,
};

#[derive(Clone)]
struct NodeHooks {
    coordinator: Arc<Coordinator>,
    sessions: SessionManager,
}

/// In-memory wire between the fleet's nodes
#[derive(Default)]
struct Router {
    nodes: RwLock<HashMap<String, NodeHooks>>,
    /// Swallow begin envelopes, simulating a leader that dies after setup
    drop_begins: AtomicBool,
}

struct RouterOutbox {
    from: String,
    router: Arc<Router>,
}

#[async_trait]
impl Outbox for RouterOutbox {
    async fn send_to(&self, validator: &str, envelope: &Envelope) -> Result<()> {
        if envelope.kind == MessageKind::Begin && self.router.drop_begins.load(Ordering::SeqCst) {
            return Ok(());
        }
        let hooks = self
            .router
            .nodes
            .read()
            .get(validator)
            .cloned()
            .ok_or_else(|| Error::Delivery {
                validator: validator.to_string(),
                reason: "unknown node".to_string(),
            })?;

        match envelope.kind {
            MessageKind::Ack => hooks.coordinator.handle_ack(&envelope.event_id, &self.from),
            MessageKind::Setup => {
                hooks
                    .sessions
                    .handle_setup(
                        &self.from,
                        &envelope.event_id,
                        &envelope.payload,
                        &envelope.participants,
                    )
                    .await?;
            }
            MessageKind::Begin => hooks.sessions.handle_begin(&envelope.event_id),
            MessageKind::Step => {
                hooks
                    .sessions
                    .handle_step(&self.from, &envelope.event_id, envelope.payload.clone());
            }
        }
        Ok(())
    }
}

struct FleetNode {
    address: String,
    store: Arc<EventStore>,
    vault: Arc<KeyshareVault>,
    coordinator: Arc<Coordinator>,
    maintenance: Arc<MaintenanceHandler>,
    _dir: TempDir,
}

struct Fleet {
    chain: Arc<MockChain>,
    driver: Arc<MockDriver>,
    router: Arc<Router>,
    nodes: Vec<FleetNode>,
}

impl Fleet {
    fn new(addresses: &[&str], tune: impl Fn(&mut TssConfig)) -> Self {
        let chain = Arc::new(MockChain::new());
        chain.set_validators(
            addresses
                .iter()
                .map(|a| validator(a, ValidatorStatus::Active))
                .collect(),
        );
        let driver = Arc::new(MockDriver::new("eip155:1"));
        let router = Arc::new(Router::default());

        let nodes = addresses
            .iter()
            .map(|address| {
                let dir = tempfile::tempdir().unwrap();
                let store = Arc::new(EventStore::open(dir.path().join("events.json")).unwrap());
                let vault =
                    Arc::new(KeyshareVault::open(dir.path().join("vault"), "pw").unwrap());
                let voter: Arc<dyn Voter> = Arc::new(AuthzVoter::new(
                    Arc::new(StaticSigner::new(&format!("{address}-hot"), address)),
                    Arc::clone(&chain) as Arc<dyn TxBroadcaster>,
                ));
                let chains = Chains::new();
                chains.register(Arc::clone(&driver) as _);

                let mut config = TssConfig::new(*address);
                config.setup_timeout = Duration::from_secs(2);
                config.session_expiry = Duration::from_secs(5);
                tune(&mut config);
                let config = Arc::new(config);

                let outbox: Arc<dyn Outbox> = Arc::new(RouterOutbox {
                    from: (*address).to_string(),
                    router: Arc::clone(&router),
                });

                let sessions = SessionManager::new(
                    Arc::clone(&config),
                    Arc::clone(&store),
                    Arc::clone(&vault),
                    Arc::clone(&chain) as Arc<dyn DataProvider>,
                    Arc::clone(&voter),
                    chains,
                    Arc::new(EchoProtocol),
                    Arc::clone(&outbox),
                );
                let coordinator = Arc::new(Coordinator::new(
                    Arc::clone(&config),
                    Arc::clone(&store),
                    Arc::clone(&chain) as Arc<dyn DataProvider>,
                    Arc::new(EchoProtocol),
                    Arc::clone(&outbox),
                ));
                let maintenance = Arc::new(MaintenanceHandler::new(
                    Arc::clone(&config),
                    Arc::clone(&store),
                    Arc::clone(&chain) as Arc<dyn DataProvider>,
                    Arc::clone(&voter),
                ));

                router.nodes.write().insert(
                    (*address).to_string(),
                    NodeHooks {
                        coordinator: Arc::clone(&coordinator),
                        sessions,
                    },
                );

                FleetNode {
                    address: (*address).to_string(),
                    store,
                    vault,
                    coordinator,
                    maintenance,
                    _dir: dir,
                }
            })
            .collect();

        Self {
            chain,
            driver,
            router,
            nodes,
        }
    }

    /// Insert the same event into every node's store, as the core-chain
    /// observer would.
    fn insert_everywhere(&self, event: &Event) {
        for node in &self.nodes {
            node.store.insert(event.clone()).unwrap();
        }
    }

    /// One coordinator poll on every node
    async fn tick_all(&self) {
        for node in &self.nodes {
            node.coordinator.tick().await.unwrap();
        }
    }

    fn statuses(&self, event_id: &str) -> Vec<EventStatus> {
        self.nodes
            .iter()
            .map(|n| n.store.get(event_id).unwrap().status)
            .collect()
    }

    fn node(&self, address: &str) -> &FleetNode {
        self.nodes
            .iter()
            .find(|n| n.address == address)
            .expect("unknown node")
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

fn keygen_event(id: &str, block: u64) -> Event {
    Event::new(id, block, ProtocolType::Keygen, 100_000, Vec::new())
}

/// Three nodes, one PENDING keygen at block 100, head at 111: one poll
/// round drives every node to COMPLETED with a stored keyshare, and the
/// chain sees one key-process vote per node.
#[tokio::test(flavor = "multi_thread")]
async fn happy_keygen_across_three_nodes() {
    let fleet = Fleet::new(&["uv1a", "uv1b", "uv1c"], |_| {});
    fleet.chain.set_latest_block(111);
    fleet.insert_everywhere(&keygen_event("evt-keygen", 100));

    fleet.tick_all().await;
    settle().await;

    assert_eq!(
        fleet.statuses("evt-keygen"),
        vec![EventStatus::Completed; 3]
    );

    let mut key_ids = Vec::new();
    for node in &fleet.nodes {
        let ids = node.vault.list().unwrap();
        assert_eq!(ids.len(), 1, "{} holds one keyshare", node.address);
        key_ids.push(ids[0].clone());
    }
    key_ids.dedup();
    assert_eq!(key_ids.len(), 1, "every node stored the same key id");

    let key_votes = fleet
        .chain
        .votes()
        .into_iter()
        .filter(|v| matches!(v, VoteMsg::VoteTssKeyProcess { .. }))
        .count();
    assert_eq!(key_votes, 3);
}

/// The leader dies between setup and begin: every session expires, the
/// event is rescheduled with a bumped block number, and once the bump
/// crosses a rotation boundary a different leader completes it.
#[tokio::test(flavor = "multi_thread")]
async fn leader_crash_after_setup_recovers_next_epoch() {
    let fleet = Fleet::new(&["uv1a", "uv1b", "uv1c"], |config| {
        config.session_expiry = Duration::from_millis(200);
        config.session_expiry_block_delay = 10;
    });
    // Block 100, range 100: epoch 1 elects uv1b.
    fleet.chain.set_latest_block(111);
    fleet.insert_everywhere(&keygen_event("evt-keygen", 100));

    fleet.router.drop_begins.store(true, Ordering::SeqCst);
    fleet.tick_all().await;

    // Sessions never hear begin and go quiet past the expiry window.
    tokio::time::sleep(Duration::from_millis(600)).await;
    for node in &fleet.nodes {
        let event = node.store.get("evt-keygen").unwrap();
        assert_eq!(event.status, EventStatus::Pending, "{}", node.address);
        assert_eq!(event.next_eligible_block, 121, "{}", node.address);
        assert_eq!(event.block_number, 121, "retry carries a bumped block");
        assert!(event.status_reason.contains("session expired"));
    }

    // Still epoch 1: uv1b leads the retry and crashes again.
    fleet.chain.set_latest_block(211);
    fleet.tick_all().await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    for node in &fleet.nodes {
        let event = node.store.get("evt-keygen").unwrap();
        assert_eq!(event.status, EventStatus::Pending, "{}", node.address);
        // 221 / 100 = epoch 2: leadership has rotated off the crashed node.
        assert_eq!(event.block_number, 221, "{}", node.address);
    }

    // A healthy wire and the rotated leader finish the job.
    fleet.router.drop_begins.store(false, Ordering::SeqCst);
    fleet.chain.set_latest_block(241);
    fleet.tick_all().await;
    settle().await;

    assert_eq!(
        fleet.statuses("evt-keygen"),
        vec![EventStatus::Completed; 3]
    );
}

/// Full SIGN pipeline: keygen first, then a sign event rides the stored
/// key through the chain driver and lands BROADCASTED with a CAIP hash.
#[tokio::test(flavor = "multi_thread")]
async fn sign_pipeline_broadcasts_through_the_driver() {
    let fleet = Fleet::new(&["uv1a", "uv1b", "uv1c"], |config| {
        // Select the whole fleet so every local store progresses.
        config.threshold_percent = 100;
    });
    fleet.chain.set_latest_block(111);
    fleet.insert_everywhere(&keygen_event("evt-keygen", 100));
    fleet.tick_all().await;
    settle().await;

    let key_id = fleet.node("uv1a").vault.list().unwrap().remove(0);

    let data = SignData {
        key_id,
        message_hash: "ef".repeat(32),
        derivation_path: String::new(),
        chain_id: "eip155:1".into(),
    };
    let mut sign = Event::new("evt-sign", 120, ProtocolType::Sign, 100_000, data.to_bytes());
    sign.tx_id = Some("77".into());
    fleet.insert_everywhere(&sign);

    fleet.chain.set_latest_block(131);
    fleet.tick_all().await;
    settle().await;

    for node in &fleet.nodes {
        let event = node.store.get("evt-sign").unwrap();
        assert_eq!(event.status, EventStatus::Broadcasted, "{}", node.address);
        let caip = event.broadcasted_tx_hash.clone().unwrap();
        assert!(caip.starts_with("eip155:1:0x"), "{caip}");
    }
    assert!(
        !fleet.driver.submissions().is_empty(),
        "signature reached the external chain"
    );
}

/// An expired SIGN event in BROADCASTED is reverted by maintenance with
/// the raw hash parsed back out of the CAIP reference.
#[tokio::test(flavor = "multi_thread")]
async fn maintenance_reverts_expired_broadcasted_sign() {
    let fleet = Fleet::new(&["uv1a"], |_| {});
    fleet.chain.set_latest_block(100);

    let data = SignData {
        key_id: "tss-1".into(),
        message_hash: "aa".repeat(32),
        derivation_path: String::new(),
        chain_id: "eip155:1".into(),
    };
    let mut event = Event::new("evt-sign", 10, ProtocolType::Sign, 90, data.to_bytes());
    event.tx_id = Some("tx-42".into());
    fleet.insert_everywhere(&event);

    let node = fleet.node("uv1a");
    node.store
        .update_status("evt-sign", EventStatus::InProgress, "")
        .unwrap();
    node.store
        .set_broadcasted_tx_hash(
            "evt-sign",
            &"eip155:1:0xabc".parse::<universal_types::TxRef>().unwrap(),
        )
        .unwrap();

    node.maintenance.expiry_sweep().await.unwrap();

    assert_eq!(node.store.get("evt-sign").unwrap().status, EventStatus::Reverted);
    let votes = fleet.chain.votes();
    assert_eq!(votes.len(), 1);
    assert_eq!(
        votes[0],
        VoteMsg::VoteOutbound {
            tx_id: "tx-42".into(),
            success: false,
            tx_hash: "0xabc".into(),
            block_height: 100,
            reason: "expired after broadcast, no confirmations received".into(),
        }
    );
}

/// Restart semantics: IN_PROGRESS rows are reclaimed before the
/// coordinator loop starts, and the reclaimed event completes on the next
/// poll.
#[tokio::test(flavor = "multi_thread")]
async fn restart_reset_reclaims_in_progress_events() {
    let fleet = Fleet::new(&["uv1a", "uv1b", "uv1c"], |_| {});
    fleet.chain.set_latest_block(111);
    fleet.insert_everywhere(&keygen_event("evt-keygen", 100));

    // Simulate rows left behind by a crash mid-session.
    for node in &fleet.nodes {
        node.store
            .update_status("evt-keygen", EventStatus::InProgress, "leading session setup")
            .unwrap();
    }
    for node in &fleet.nodes {
        assert_eq!(node.store.reset_in_progress_to_pending().unwrap(), 1);
    }

    fleet.tick_all().await;
    settle().await;

    assert_eq!(
        fleet.statuses("evt-keygen"),
        vec![EventStatus::Completed; 3]
    );
}
