use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use universal_chain::{AuthzVoter, Chains, DataProvider, PushSigner, TxBroadcaster, Voter};
use universal_dkls::SigningProtocol;
use universal_keyshare::KeyshareVault;
use universal_networking::{Multiaddr, NetworkService, P2pConfig, P2pHandle, PeerId};
use universal_store::EventStore;
use universal_tss::{Coordinator, MaintenanceHandler, Outbox, SessionManager, TssConfig};
use universal_types::{Envelope, MessageKind};

/// Errors surfaced while assembling or running a node
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("keyshare vault: {0}")]
    Vault(#[from] universal_keyshare::Error),

    #[error("event store: {0}")]
    Store(#[from] universal_store::Error),

    #[error("transport: {0}")]
    Transport(#[from] universal_networking::Error),

    #[error("chain interface: {0}")]
    Chain(#[from] universal_chain::Error),

    #[error("tss engine: {0}")]
    Tss(#[from] universal_tss::Error),
}

/// Everything the node needs to talk to the core chain and the external
/// chains. These are external collaborators; the binary wires in the demo
/// implementations, tests wire in mocks.
#[derive(Clone)]
pub struct ChainInterfaces {
    pub provider: Arc<dyn DataProvider>,
    pub signer: Arc<dyn PushSigner>,
    pub broadcaster: Arc<dyn TxBroadcaster>,
    pub chains: Chains,
}

#[derive(Clone)]
pub struct NodeConfig {
    pub home: PathBuf,
    pub password: String,
    /// 32-byte seed the transport identity derives from
    pub p2p_seed: [u8; 32],
    pub p2p_listen: Vec<Multiaddr>,
    pub tss: TssConfig,
}

/// Demultiplexes inbound envelopes onto the coordinator and the session
/// manager, keyed on the message tag.
#[derive(Clone)]
struct Dispatcher {
    coordinator: Arc<Coordinator>,
    sessions: SessionManager,
}

impl Dispatcher {
    async fn dispatch(&self, from: &str, envelope: Envelope) {
        match envelope.kind {
            MessageKind::Ack => self.coordinator.handle_ack(&envelope.event_id, from),
            MessageKind::Setup => {
                if let Err(e) = self
                    .sessions
                    .handle_setup(
                        from,
                        &envelope.event_id,
                        &envelope.payload,
                        &envelope.participants,
                    )
                    .await
                {
                    warn!(event_id = %envelope.event_id, error = %e, "setup handling failed");
                }
            }
            MessageKind::Begin => self.sessions.handle_begin(&envelope.event_id),
            MessageKind::Step => {
                self.sessions
                    .handle_step(from, &envelope.event_id, envelope.payload);
            }
        }
    }
}

/// Outbound envelope delivery with on-demand peer discovery.
///
/// Self-addressed envelopes never touch the wire: they go straight into
/// the local dispatcher, byte-for-byte the same payload a remote peer
/// would receive. For remote validators the peer identity and multiaddrs
/// are resolved from the data provider once and cached.
struct NodeOutbox {
    validator_address: String,
    transport: P2pHandle,
    provider: Arc<dyn DataProvider>,
    dispatcher: OnceLock<Dispatcher>,
    registered: DashMap<String, PeerId>,
}

impl NodeOutbox {
    fn delivery_error(validator: &str, reason: impl ToString) -> universal_tss::Error {
        universal_tss::Error::Delivery {
            validator: validator.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn resolve_peer(&self, validator: &str) -> universal_tss::Result<PeerId> {
        if let Some(peer) = self.registered.get(validator) {
            return Ok(*peer);
        }

        let network = self
            .provider
            .validator_network(validator)
            .await?
            .ok_or_else(|| Self::delivery_error(validator, "no published network info"))?;
        let peer: PeerId = network
            .peer_id
            .parse()
            .map_err(|e| Self::delivery_error(validator, format!("bad peer id: {e}")))?;
        let addrs: Vec<Multiaddr> = network
            .multiaddrs
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect();
        if addrs.is_empty() {
            return Err(Self::delivery_error(validator, "no usable multiaddrs"));
        }

        self.transport
            .ensure_peer(peer, &addrs)
            .await
            .map_err(|e| Self::delivery_error(validator, e))?;
        self.registered.insert(validator.to_string(), peer);
        debug!(%validator, %peer, "peer registered on demand");
        Ok(peer)
    }
}

#[async_trait]
impl Outbox for NodeOutbox {
    async fn send_to(&self, validator: &str, envelope: &Envelope) -> universal_tss::Result<()> {
        if validator == self.validator_address {
            if let Some(dispatcher) = self.dispatcher.get() {
                dispatcher
                    .dispatch(&self.validator_address, envelope.clone())
                    .await;
            }
            return Ok(());
        }

        let peer = self.resolve_peer(validator).await?;
        self.transport
            .send(peer, envelope.to_bytes())
            .await
            .map_err(|e| Self::delivery_error(validator, e))
    }
}

/// A running Universal Client node
pub struct Node {
    validator_address: String,
    store: Arc<EventStore>,
    vault: Arc<KeyshareVault>,
    transport: P2pHandle,
    sessions: SessionManager,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Assemble and start a node.
    ///
    /// Lifecycle order matters: the vault and store open first, the
    /// transport comes up and registers the single inbound handler, the
    /// crash reset reclaims orphaned `IN_PROGRESS` rows, and only then do
    /// the coordinator, session and maintenance loops start.
    pub async fn start(
        config: NodeConfig,
        chain: ChainInterfaces,
        protocol: Arc<dyn SigningProtocol>,
    ) -> Result<Node, NodeError> {
        let validator_address = config.tss.validator_address.clone();

        let vault = Arc::new(KeyshareVault::open(
            config.home.join("keyshares"),
            config.password.clone(),
        )?);
        let store = Arc::new(EventStore::open(config.home.join("events.json"))?);

        let mut p2p = P2pConfig::new(config.p2p_seed);
        p2p.listen_addrs = config.p2p_listen.clone();
        let (transport, transport_task) = NetworkService::new(p2p)?.start().await?;
        info!(
            validator = %validator_address,
            peer_id = %transport.local_peer_id(),
            "transport up"
        );

        let outbox = Arc::new(NodeOutbox {
            validator_address: validator_address.clone(),
            transport: transport.clone(),
            provider: Arc::clone(&chain.provider),
            dispatcher: OnceLock::new(),
            registered: DashMap::new(),
        });

        let voter: Arc<dyn Voter> = Arc::new(AuthzVoter::new(
            Arc::clone(&chain.signer),
            Arc::clone(&chain.broadcaster),
        ));
        let tss_config = Arc::new(config.tss.clone());

        let sessions = SessionManager::new(
            Arc::clone(&tss_config),
            Arc::clone(&store),
            Arc::clone(&vault),
            Arc::clone(&chain.provider),
            Arc::clone(&voter),
            chain.chains.clone(),
            Arc::clone(&protocol),
            Arc::clone(&outbox) as Arc<dyn Outbox>,
        );
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&tss_config),
            Arc::clone(&store),
            Arc::clone(&chain.provider),
            Arc::clone(&protocol),
            Arc::clone(&outbox) as Arc<dyn Outbox>,
        ));
        let maintenance = Arc::new(MaintenanceHandler::new(
            Arc::clone(&tss_config),
            Arc::clone(&store),
            Arc::clone(&chain.provider),
            Arc::clone(&voter),
        ));

        let dispatcher = Dispatcher {
            coordinator: Arc::clone(&coordinator),
            sessions: sessions.clone(),
        };
        outbox.dispatcher.set(dispatcher.clone()).ok();

        // The single inbound handler: map the sender's peer identity back
        // to a validator address, then demux on the envelope tag.
        let handler_dispatcher = dispatcher.clone();
        let handler_provider = Arc::clone(&chain.provider);
        transport.register_handler(Arc::new(move |peer, bytes| {
            let dispatcher = handler_dispatcher.clone();
            let provider = Arc::clone(&handler_provider);
            Box::pin(async move {
                let envelope = Envelope::from_bytes(&bytes)?;
                let sender = provider
                    .validator_set()
                    .await?
                    .into_iter()
                    .find(|v| v.network.peer_id == peer.to_string())
                    .ok_or_else(|| format!("envelope from unknown peer {peer}"))?;
                dispatcher
                    .dispatch(&sender.validator_address, envelope)
                    .await;
                Ok(())
            })
        }))?;

        // Sessions are not durable; reclaim whatever a crash left behind.
        let reset = store.reset_in_progress_to_pending()?;
        if reset > 0 {
            info!(reset, "reclaimed in-progress events from previous run");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            transport_task,
            tokio::spawn(Arc::clone(&coordinator).run(shutdown_rx.clone())),
            tokio::spawn(Arc::clone(&maintenance).run(shutdown_rx)),
        ];

        Ok(Node {
            validator_address,
            store,
            vault,
            transport,
            sessions,
            shutdown_tx,
            tasks,
        })
    }

    pub fn validator_address(&self) -> &str {
        &self.validator_address
    }

    pub fn peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    /// Reachable listen addresses, identity suffix included
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.transport.listen_addrs()
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn vault(&self) -> &Arc<KeyshareVault> {
        &self.vault
    }

    /// Stop the loops, drop live sessions and close the transport.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        self.sessions.shutdown();
        self.transport.close().await;
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!(validator = %self.validator_address, "node stopped");
    }
}
