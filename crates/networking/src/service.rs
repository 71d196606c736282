use crate::{Error, FrameCodec, Result as CrateResult, keypair_from_seed};
use dashmap::DashMap;
use futures::StreamExt;
use futures::future::BoxFuture;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{self, OutboundFailure, OutboundRequestId, ProtocolSupport};
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{Multiaddr, PeerId, StreamProtocol, Swarm, identify, ping};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Protocol id spoken between client nodes
pub const PROTOCOL_NAME: StreamProtocol = StreamProtocol::new("/universal-client/tss/1.0.0");

const IDENTIFY_PROTOCOL: &str = "/universal-client/id/1.0.0";
const COMMAND_BUFFER: usize = 256;
/// How long to wait for the first listener to come up
const LISTEN_PROBE: Duration = Duration::from_secs(5);

/// Error type inbound handlers may return; it is logged, never propagated
/// back to the sender.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The node's single inbound dispatch function: `(sender, frame bytes)`.
pub type InboundHandler = Arc<
    dyn Fn(PeerId, Vec<u8>) -> BoxFuture<'static, std::result::Result<(), HandlerError>>
        + Send
        + Sync,
>;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// 32-byte private seed the Ed25519 identity derives from
    pub seed: [u8; 32],
    /// Addresses to listen on; `/p2p/` suffixes are added in reports
    pub listen_addrs: Vec<Multiaddr>,
    /// Budget for establishing a session to a peer
    pub dial_timeout: Duration,
    /// Budget for writing one frame on an established session
    pub io_timeout: Duration,
}

impl P2pConfig {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            listen_addrs: Vec::new(),
            dial_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_listen_addr(mut self, addr: Multiaddr) -> Self {
        self.listen_addrs.push(addr);
        self
    }
}

#[derive(NetworkBehaviour)]
struct Behaviour {
    frames: request_response::Behaviour<FrameCodec>,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

enum Command {
    Send {
        peer: PeerId,
        payload: Vec<u8>,
        reply: oneshot::Sender<CrateResult<()>>,
    },
    AddPeer {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<()>,
    },
    Close,
}

/// Shared state between the service task and its handles
struct Shared {
    local_peer_id: PeerId,
    handler: Mutex<Option<InboundHandler>>,
    peers: DashMap<PeerId, HashSet<Multiaddr>>,
    listeners: RwLock<Vec<Multiaddr>>,
}

/// The transport service. Owns the libp2p swarm; constructed with
/// [`NetworkService::new`] and consumed by [`NetworkService::start`], which
/// moves the event loop onto its own task and returns a [`P2pHandle`].
pub struct NetworkService {
    swarm: Swarm<Behaviour>,
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    send_timeout: Duration,
    expects_listener: bool,
}

impl NetworkService {
    pub fn new(config: P2pConfig) -> CrateResult<Self> {
        let keypair = keypair_from_seed(config.seed)?;
        let local_peer_id = PeerId::from(keypair.public());

        // The request timeout covers dialing plus the frame write; the two
        // budgets are configured separately but enforced as one deadline.
        let request_timeout = config.dial_timeout + config.io_timeout;

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default().nodelay(true),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| Error::Transport(e.to_string()))?
            .with_behaviour(|key| Behaviour {
                frames: request_response::Behaviour::with_codec(
                    FrameCodec,
                    [(PROTOCOL_NAME, ProtocolSupport::Full)],
                    request_response::Config::default().with_request_timeout(request_timeout),
                ),
                identify: identify::Behaviour::new(identify::Config::new(
                    IDENTIFY_PROTOCOL.to_string(),
                    key.public(),
                )),
                ping: ping::Behaviour::default(),
            })
            .map_err(|e| Error::Transport(e.to_string()))?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        let expects_listener = !config.listen_addrs.is_empty();
        for addr in &config.listen_addrs {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| Error::Transport(e.to_string()))?;
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        Ok(Self {
            swarm,
            shared: Arc::new(Shared {
                local_peer_id,
                handler: Mutex::new(None),
                peers: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
            }),
            command_tx,
            command_rx,
            send_timeout: request_timeout,
            expects_listener,
        })
    }

    /// Spawn the event loop and hand back the control handle.
    ///
    /// If the service was configured with listen addresses, this waits (up
    /// to a short probe window) for the first listener to come up, so
    /// callers can immediately publish their reachable addresses.
    pub async fn start(self) -> CrateResult<(P2pHandle, JoinHandle<()>)> {
        let handle = P2pHandle {
            shared: self.shared.clone(),
            command_tx: self.command_tx.clone(),
            send_timeout: self.send_timeout,
        };
        let expects_listener = self.expects_listener;
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(self.run(ready_tx));

        if expects_listener {
            match tokio::time::timeout(LISTEN_PROBE, ready_rx).await {
                Ok(Ok(())) => {}
                _ => return Err(Error::NoListenAddr),
            }
        }
        Ok((handle, task))
    }

    async fn run(mut self, ready_tx: oneshot::Sender<()>) {
        let mut ready_tx = Some(ready_tx);
        let mut pending: HashMap<OutboundRequestId, oneshot::Sender<CrateResult<()>>> = HashMap::new();

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Send { peer, payload, reply }) => {
                        let id = self.swarm.behaviour_mut().frames.send_request(&peer, payload);
                        pending.insert(id, reply);
                    }
                    Some(Command::AddPeer { peer, addrs, reply }) => {
                        for addr in addrs {
                            self.swarm.add_peer_address(peer, addr);
                        }
                        let _ = reply.send(());
                    }
                    Some(Command::Close) | None => break,
                },
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event, &mut pending, &mut ready_tx);
                }
            }
        }

        for (_, reply) in pending.drain() {
            let _ = reply.send(Err(Error::ServiceStopped));
        }
        debug!(peer = %self.shared.local_peer_id, "transport service stopped");
    }

    fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<BehaviourEvent>,
        pending: &mut HashMap<OutboundRequestId, oneshot::Sender<CrateResult<()>>>,
        ready_tx: &mut Option<oneshot::Sender<()>>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                debug!(%address, "listening");
                self.shared.listeners.write().push(address);
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.shared.listeners.write().retain(|a| *a != address);
            }
            SwarmEvent::Behaviour(BehaviourEvent::Frames(event)) => {
                self.handle_frame_event(event, pending);
            }
            SwarmEvent::Behaviour(BehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                ..
            })) => {
                trace!(%peer_id, "identified peer");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                trace!(%peer_id, "connection established");
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                trace!(%peer_id, ?cause, "connection closed");
            }
            _ => {}
        }
    }

    fn handle_frame_event(
        &mut self,
        event: request_response::Event<Vec<u8>, ()>,
        pending: &mut HashMap<OutboundRequestId, oneshot::Sender<CrateResult<()>>>,
    ) {
        match event {
            request_response::Event::Message {
                peer,
                message:
                    request_response::Message::Request {
                        request, channel, ..
                    },
                ..
            } => {
                // Ack first so the sender's stream closes promptly, then
                // hand the frame off on a detached task.
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .frames
                    .send_response(channel, ());

                let handler = self.shared.handler.lock().clone();
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            if let Err(e) = handler(peer, request).await {
                                warn!(%peer, error = %e, "inbound handler failed");
                            }
                        });
                    }
                    None => warn!(%peer, "no inbound handler registered, dropping frame"),
                }
            }
            request_response::Event::Message {
                message: request_response::Message::Response { request_id, .. },
                ..
            } => {
                if let Some(reply) = pending.remove(&request_id) {
                    let _ = reply.send(Ok(()));
                }
            }
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                if let Some(reply) = pending.remove(&request_id) {
                    let _ = reply.send(Err(map_outbound_failure(peer, &error)));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                debug!(%peer, %error, "inbound frame failure");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }
}

fn map_outbound_failure(peer: PeerId, error: &OutboundFailure) -> Error {
    match error {
        OutboundFailure::Timeout => Error::Timeout { peer },
        OutboundFailure::DialFailure => Error::Dial {
            peer,
            reason: "dial failure".to_string(),
        },
        other => Error::Send {
            peer,
            reason: other.to_string(),
        },
    }
}

/// Cloneable control handle for the transport service
#[derive(Clone)]
pub struct P2pHandle {
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<Command>,
    send_timeout: Duration,
}

impl P2pHandle {
    /// This node's identity on the wire
    pub fn local_peer_id(&self) -> PeerId {
        self.shared.local_peer_id
    }

    /// Current listen addresses with the `/p2p/<id>` suffix appended.
    /// Unspecified-IP addresses are filtered out of the report.
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        let peer_id = self.shared.local_peer_id;
        self.shared
            .listeners
            .read()
            .iter()
            .filter(|addr| !is_unspecified(addr))
            .map(|addr| {
                if addr.iter().any(|p| matches!(p, Protocol::P2p(_))) {
                    addr.clone()
                } else {
                    addr.clone().with(Protocol::P2p(peer_id))
                }
            })
            .collect()
    }

    /// Register the single inbound dispatch function.
    ///
    /// A second registration on the same transport instance fails.
    pub fn register_handler(&self, handler: InboundHandler) -> CrateResult<()> {
        let mut slot = self.shared.handler.lock();
        if slot.is_some() {
            return Err(Error::HandlerAlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Whether `ensure_peer` has been called for this peer
    pub fn knows_peer(&self, peer: &PeerId) -> bool {
        self.shared.peers.contains_key(peer)
    }

    /// Teach the transport how to reach `peer`. Idempotent.
    ///
    /// Addresses may carry a `/p2p/` suffix; if they do, it must match
    /// `peer`, and it is stripped before the address enters the dial table.
    pub async fn ensure_peer(&self, peer: PeerId, addrs: &[Multiaddr]) -> CrateResult<()> {
        let mut cleaned = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let mut addr = addr.clone();
            let embedded = match addr.iter().last() {
                Some(Protocol::P2p(id)) => Some(id),
                _ => None,
            };
            if let Some(embedded) = embedded {
                if embedded != peer {
                    return Err(Error::PeerIdMismatch {
                        expected: peer,
                        addr: addr.clone(),
                    });
                }
                addr.pop();
            }
            cleaned.push(addr);
        }

        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::AddPeer {
                peer,
                addrs: cleaned.clone(),
                reply,
            })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?;

        self.shared.peers.entry(peer).or_default().extend(cleaned);
        Ok(())
    }

    /// Send one frame to a known peer, fire-and-forget at the application
    /// layer. Resolves once the peer consumed the frame, or with a typed
    /// error on timeout, dial failure or write failure.
    pub async fn send(&self, peer: PeerId, payload: Vec<u8>) -> CrateResult<()> {
        if !self.shared.peers.contains_key(&peer) {
            return Err(Error::UnknownPeer(peer));
        }

        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Send {
                peer,
                payload,
                reply,
            })
            .await
            .map_err(|_| Error::ServiceStopped)?;

        match tokio::time::timeout(self.send_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ServiceStopped),
            Err(_) => Err(Error::Timeout { peer }),
        }
    }

    /// Stop the service task. Further sends fail with `ServiceStopped`.
    pub async fn close(&self) {
        let _ = self.command_tx.send(Command::Close).await;
    }
}

fn is_unspecified(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| match p {
        Protocol::Ip4(ip) => ip.is_unspecified(),
        Protocol::Ip6(ip) => ip.is_unspecified(),
        _ => false,
    })
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn unspecified_addresses_are_detected() {
        let any: Multiaddr = "/ip4/0.0.0.0/tcp/9000".parse().unwrap();
        let local: Multiaddr = "/ip4/127.0.0.1/tcp/9000".parse().unwrap();
        let any6: Multiaddr = "/ip6/::/tcp/9000".parse().unwrap();
        assert!(is_unspecified(&any));
        assert!(is_unspecified(&any6));
        assert!(!is_unspecified(&local));
    }
}
