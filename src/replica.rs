/***************************************************************************************************
Glue between the wire layer, the peer registry, the chain, and the PBFT engine. A `Replica` is the
unit the operator CLI drives: it owns the listener thread and a single coarse lock around the
mutable protocol state. Handler threads only hold that lock for the short arithmetic/set-update
critical section; all network I/O happens with the lock released.
***************************************************************************************************/

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

use crate::engine::{Engine, EngineAction};
use crate::error::LedgerError;
use crate::record::{Chain, Record};
use crate::registry::{PeerId, PeerRegistry};
use crate::wire::{self, Listener, Message};

struct Inner {
    registry: PeerRegistry,
    chain: Option<Chain>,
    engine: Engine,
}

/// A single PBFT replica: its own id and port, its view of the cluster, its chain, and the
/// listener thread accepting inbound protocol messages.
pub struct Replica {
    id: PeerId,
    port: u16,
    running: Arc<AtomicBool>,
    inner: Mutex<Inner>,
    listener: Mutex<Option<Listener>>,
}

impl Replica {
    /// Creates a replica for `id` on `port`. Replica 0 is the sole founder of the cluster and
    /// owns the chain from instantiation (view 0 mod total_peers(=1) is always 0); every other
    /// replica starts with no chain and acquires one via genesis sync on its first `connect`.
    pub fn new(id: PeerId, port: u16) -> Arc<Self> {
        let chain = if id == PeerId(0) {
            Some(Chain::genesis(now_nanos()))
        } else {
            None
        };

        Arc::new(Replica {
            id,
            port,
            running: Arc::new(AtomicBool::new(true)),
            inner: Mutex::new(Inner {
                registry: PeerRegistry::new(id),
                chain,
                engine: Engine::new(id),
            }),
            listener: Mutex::new(None),
        })
    }

    /// This replica's id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Starts the TCP listener on a background thread. Accepted connections are dispatched back
    /// into this replica's `handle_message`.
    pub fn start(self: &Arc<Self>, accept_timeout: Duration) -> std::io::Result<()> {
        let replica = Arc::clone(self);
        let listener = Listener::spawn(self.port, Arc::clone(&self.running), accept_timeout, move |message| {
            replica.handle_message(message)
        })?;
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    /// Connects to `peer_id` at `(127.0.0.1, port)`: records the endpoint, runs the genesis
    /// handshake, and sends `connect_back` so the peer learns about this replica too.
    pub fn connect(&self, peer_id: PeerId, port: u16) -> Result<(), LedgerError> {
        let addr: SocketAddr = format!("127.0.0.1:{}", port)
            .parse()
            .expect("127.0.0.1:<port> is always a valid socket address");

        {
            let mut inner = self.inner.lock().unwrap();
            inner.registry.insert(peer_id, addr);
        }

        self.sync_genesis(peer_id, addr)?;

        wire::send(
            peer_id,
            addr,
            &Message::ConnectBack {
                peer_id: self.id,
                peer_port: self.port,
            },
        )
    }

    fn sync_genesis(&self, peer_id: PeerId, addr: SocketAddr) -> Result<(), LedgerError> {
        let have_chain = self.inner.lock().unwrap().chain.is_some();

        if have_chain {
            let message = {
                let inner = self.inner.lock().unwrap();
                genesis_message(inner.chain.as_ref().unwrap())
            };
            wire::send(peer_id, addr, &message)
        } else {
            let reply = wire::send_and_await_reply(peer_id, addr, &Message::RequestGenesis)?;
            if let Message::SendGenesis { timestamp, data, prev_digest, digest } = reply {
                let record = Record::from_genesis_fields(timestamp, data, prev_digest, digest);
                let mut inner = self.inner.lock().unwrap();
                if inner.chain.is_none() {
                    info!(target: "bootstrap", "replica {} synchronized genesis from {}", self.id, peer_id);
                    inner.chain = Some(Chain::from_genesis(record));
                }
                Ok(())
            } else {
                warn!(target: "bootstrap", "replica {} expected send_genesis from {}, got something else", self.id, peer_id);
                Ok(())
            }
        }
    }

    /// Submits `data` as a new record. Leader-only: returns `NotLeader` on a follower and
    /// `GenesisMissing` if the chain hasn't been bootstrapped yet. On success, broadcasts a
    /// pre-prepare to every known peer; the leader's own chain grows only once 2f+1 commits from
    /// others arrive (see design notes; the leader never self-delivers).
    pub fn submit(&self, data: Vec<u8>) -> Result<(), LedgerError> {
        let message = {
            let inner = self.inner.lock().unwrap();
            if inner.registry.primary_id() != self.id {
                return Err(LedgerError::NotLeader(self.id));
            }
            let chain = inner.chain.as_ref().ok_or(LedgerError::GenesisMissing)?;
            let index = chain.len() as u64;
            let view = inner.registry.view();
            let (_record, message) = inner.engine.propose(index, now_nanos(), data, view);
            message
        };
        self.broadcast(message);
        Ok(())
    }

    /// A snapshot of the current chain, for the operator's print-chain command.
    pub fn chain_snapshot(&self) -> Option<Vec<Record>> {
        self.inner.lock().unwrap().chain.as_ref().map(|c| c.records().to_vec())
    }

    /// True iff `chain.validate()` holds, or the chain isn't bootstrapped yet.
    pub fn chain_is_valid(&self) -> bool {
        self.inner.lock().unwrap().chain.as_ref().map_or(true, Chain::validate)
    }

    /// Flips the Byzantine fault-injection flag and returns the new state.
    pub fn toggle_byzantine(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let next = !inner.engine.is_byzantine();
        inner.engine.set_byzantine(next);
        next
    }

    /// True iff this replica is currently the primary for the current view.
    pub fn is_primary(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.registry.primary_id() == self.id
    }

    /// Stops the acceptor thread and joins it. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(listener) = self.listener.lock().unwrap().as_mut() {
            listener.join();
        }
    }

    /// Dispatches one inbound message. Called from the wire listener's handler thread. Returns a
    /// reply to write back over the same connection only for `RequestGenesis`; every other
    /// message is fire-and-forget.
    fn handle_message(&self, message: Message) -> Option<Message> {
        match message {
            Message::PrePrepare { record, view } => {
                let action = self.inner.lock().unwrap().engine.on_preprepare(record, view);
                self.run_action(action);
                None
            }
            Message::Prepare { record, view, peer_id } => {
                let action = {
                    let mut inner = self.inner.lock().unwrap();
                    let total_peers = inner.registry.total_peers();
                    inner.engine.on_prepare(record, view, peer_id, total_peers)
                };
                self.run_action(action);
                None
            }
            Message::Commit { record, view, peer_id } => {
                let action = {
                    let mut inner = self.inner.lock().unwrap();
                    let total_peers = inner.registry.total_peers();
                    inner.engine.on_commit(record, view, peer_id, total_peers)
                };
                self.run_action(action);
                None
            }
            Message::RequestGenesis => {
                let inner = self.inner.lock().unwrap();
                inner.chain.as_ref().map(genesis_message)
            }
            Message::SendGenesis { timestamp, data, prev_digest, digest } => {
                let mut inner = self.inner.lock().unwrap();
                if inner.chain.is_none() {
                    let record = Record::from_genesis_fields(timestamp, data, prev_digest, digest);
                    info!(target: "bootstrap", "replica {} received genesis push", self.id);
                    inner.chain = Some(Chain::from_genesis(record));
                }
                None
            }
            Message::ConnectBack { peer_id, peer_port } => {
                let mut inner = self.inner.lock().unwrap();
                if !inner.registry.contains(peer_id) {
                    let addr: SocketAddr = format!("127.0.0.1:{}", peer_port)
                        .parse()
                        .expect("127.0.0.1:<port> is always a valid socket address");
                    inner.registry.insert(peer_id, addr);
                    info!(target: "bootstrap", "replica {} linked back to {}", self.id, peer_id);
                }
                None
            }
        }
    }

    fn run_action(&self, action: EngineAction) {
        match action {
            EngineAction::None => {}
            EngineAction::Broadcast(message) => self.broadcast(message),
            EngineAction::Append(record) => {
                let mut inner = self.inner.lock().unwrap();
                inner
                    .chain
                    .as_mut()
                    .expect("chain must be bootstrapped by the time a commit quorum is reached")
                    .append(record);
            }
        }
    }

    fn broadcast(&self, message: Message) {
        let endpoints: Vec<(PeerId, SocketAddr)> = {
            let inner = self.inner.lock().unwrap();
            inner.registry.endpoints().collect()
        };
        for (peer_id, addr) in endpoints {
            if let Err(e) = wire::send(peer_id, addr, &message) {
                warn!(target: "engine", "broadcast to {} failed: {}", peer_id, e);
            }
        }
    }
}

fn genesis_message(chain: &Chain) -> Message {
    let g = chain.genesis_record();
    Message::SendGenesis {
        timestamp: g.timestamp,
        data: g.data.clone(),
        prev_digest: g.prev_digest.clone(),
        digest: g.digest.clone(),
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .expect("current time fits in an i64 nanosecond timestamp until the year 2262")
}
