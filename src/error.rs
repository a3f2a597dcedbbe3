/***************************************************************************************************
Typed errors for the replica. Transport and codec failures are logged at the call site and never
propagate across the network; `NotLeader` and `GenesisMissing` are the only variants the operator
CLI surfaces directly.
***************************************************************************************************/

use crate::registry::PeerId;

/// The error kinds a replica can produce. None of these ever cross the wire: every message the
/// engine sends out is either a protocol message or nothing at all.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Failed to connect, send to, or receive from a specific peer.
    #[error("transport error with peer {peer}: {source}")]
    Transport {
        /// The peer the operation was directed at.
        peer: PeerId,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A frame was read off the wire but its tag or payload could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] bincode::Error),

    /// `submit` was called on a replica that is not the current primary.
    #[error("replica {0} is not the primary")]
    NotLeader(PeerId),

    /// `submit` was called before the chain was bootstrapped via genesis sync.
    #[error("chain not initialized")]
    GenesisMissing,
}
