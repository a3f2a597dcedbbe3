/***************************************************************************************************
The wire layer: a length-prefixed TCP listener accepting one message per connection, and a sender
that opens one short-lived connection per outbound message. Message boundaries are preserved by a
four-byte big-endian length prefix ahead of the bincode-encoded payload, following the same
"length, then bytes" framing the simulation's conv module builds by hand for its own u32 encoding.
***************************************************************************************************/

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::record::Record;
use crate::registry::PeerId;

/// The tagged union of every message a replica can send or receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Sent by the primary to propose a record for the current view.
    PrePrepare { record: Record, view: u64 },
    /// Sent by a replica after accepting a pre-prepare.
    Prepare {
        record: Record,
        view: u64,
        peer_id: PeerId,
    },
    /// Sent by a replica after collecting a prepare quorum.
    Commit {
        record: Record,
        view: u64,
        peer_id: PeerId,
    },
    /// Sent by a newly connecting replica that has no chain yet.
    RequestGenesis,
    /// Sent in reply to `RequestGenesis`, or proactively by a replica that already has a chain.
    SendGenesis {
        timestamp: i64,
        data: Vec<u8>,
        prev_digest: String,
        digest: String,
    },
    /// Sent after a one-sided `connect` so the remote peer learns about the caller too.
    ConnectBack { peer_id: PeerId, peer_port: u16 },
}

/// Opens a fresh connection to `addr` and sends `message`. Never retries; a failure is reported
/// to the caller, which logs it and moves on to the next peer in a broadcast.
pub fn send(peer_id: PeerId, addr: SocketAddr, message: &Message) -> Result<(), LedgerError> {
    let mut stream = TcpStream::connect(addr).map_err(|e| LedgerError::Transport { peer: peer_id, source: e })?;
    write_frame(&mut stream, message, peer_id)
}

/// Sends `message` to `addr` and reads back a single reply frame over the same connection, used
/// only for the genesis request/response handshake.
pub fn send_and_await_reply(peer_id: PeerId, addr: SocketAddr, message: &Message) -> Result<Message, LedgerError> {
    let mut stream = TcpStream::connect(addr).map_err(|e| LedgerError::Transport { peer: peer_id, source: e })?;
    write_frame(&mut stream, message, peer_id)?;
    read_frame(&mut stream, peer_id)
}

fn write_frame(stream: &mut TcpStream, message: &Message, peer_id: PeerId) -> Result<(), LedgerError> {
    let bytes = bincode::serialize(message)?;
    let len = (bytes.len() as u32).to_be_bytes();
    stream
        .write_all(&len)
        .and_then(|_| stream.write_all(&bytes))
        .map_err(|e| LedgerError::Transport { peer: peer_id, source: e })
}

fn read_frame(stream: &mut TcpStream, peer_id: PeerId) -> Result<Message, LedgerError> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .map_err(|e| LedgerError::Transport { peer: peer_id, source: e })?;
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .map_err(|e| LedgerError::Transport { peer: peer_id, source: e })?;
    Ok(bincode::deserialize(&buf)?)
}

/// The TCP listener. Runs an accept loop on its own thread, with a bounded accept-timeout so that
/// `running` can be flipped to false and the thread joined for a clean shutdown.
pub struct Listener {
    handle: Option<thread::JoinHandle<()>>,
}

impl Listener {
    /// Binds `(127.0.0.1, port)` and starts accepting connections on a new thread. Every accepted
    /// connection is handled on its own short-lived thread: read one frame, call `dispatch`, write
    /// back whatever reply it returns (used only by the genesis handshake), then close.
    pub fn spawn<F>(port: u16, running: Arc<AtomicBool>, accept_timeout: Duration, dispatch: F) -> std::io::Result<Self>
    where
        F: Fn(Message) -> Option<Message> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let dispatch = Arc::new(dispatch);

        let handle = thread::spawn(move || {
            debug!(target: "wire", "listening on 127.0.0.1:{}", port);
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        debug!(target: "wire", "accepted connection from {}", addr);
                        let dispatch = Arc::clone(&dispatch);
                        thread::spawn(move || handle_connection(stream, dispatch.as_ref()));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(accept_timeout);
                    }
                    Err(e) => {
                        error!(target: "wire", "accept error: {}", e);
                    }
                }
            }
            debug!(target: "wire", "listener on port {} shutting down", port);
        });

        Ok(Listener { handle: Some(handle) })
    }

    /// Blocks until the acceptor thread has exited. Callers must flip the shared `running` flag to
    /// false before calling this, or it will block until the process ends.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection<F>(mut stream: TcpStream, dispatch: &F)
where
    F: Fn(Message) -> Option<Message> + Send + Sync,
{
    stream.set_nonblocking(false).ok();
    // the sender hasn't identified itself at the transport level yet (no handshake); any
    // transport error here is reported against an unknown peer
    let unknown = PeerId(u32::MAX);
    let message = match read_frame(&mut stream, unknown) {
        Ok(m) => m,
        Err(e) => {
            warn!(target: "wire", "dropping malformed frame: {}", e);
            return;
        }
    };

    if let Some(reply) = dispatch(message) {
        if let Err(e) = write_frame(&mut stream, &reply, unknown) {
            warn!(target: "wire", "failed to send reply: {}", e);
        }
    }
}
