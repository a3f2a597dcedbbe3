/***************************************************************************************************
Peer registry. Maps peer ids to network endpoints and tracks the derived `total_peers` /
`primary_id` the engine needs for quorum and leader-eligibility math.
***************************************************************************************************/

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// A replica's numeric identifier. Used as the hashmap key for the registry and as the sender
/// field on every protocol message; trusted as stated (no signatures, see spec non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mapping from peer id to network endpoint, plus the derived replica count and leader.
///
/// The owning replica's own id is never a key in `peers`; it is counted in `total_peers` as the
/// `+1`.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, SocketAddr>,
    view: u64,
    primary_id: PeerId,
}

impl PeerRegistry {
    /// A fresh registry with no peers, view 0, and `total_peers == 1` (just this replica).
    pub fn new(self_id: PeerId) -> Self {
        let mut registry = PeerRegistry {
            peers: HashMap::new(),
            view: 0,
            primary_id: self_id,
        };
        registry.recompute_primary();
        registry
    }

    /// Records `peer_id -> endpoint`. Idempotent: connecting to an already-known peer is a no-op
    /// and returns `false`.
    pub fn insert(&mut self, peer_id: PeerId, endpoint: SocketAddr) -> bool {
        if self.peers.contains_key(&peer_id) {
            return false;
        }
        self.peers.insert(peer_id, endpoint);
        self.recompute_primary();
        true
    }

    /// True if `peer_id` is already known.
    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.peers.contains_key(&peer_id)
    }

    /// The endpoints of every known peer (never includes self).
    pub fn endpoints(&self) -> impl Iterator<Item = (PeerId, SocketAddr)> + '_ {
        self.peers.iter().map(|(id, addr)| (*id, *addr))
    }

    /// `|registry| + 1`, counting the owning replica itself.
    pub fn total_peers(&self) -> u32 {
        self.peers.len() as u32 + 1
    }

    /// `floor(total_peers / 3)`, the maximum tolerated Byzantine replicas.
    pub fn f(&self) -> u32 {
        self.total_peers() / 3
    }

    /// Current view number.
    pub fn view(&self) -> u64 {
        self.view
    }

    /// `view mod total_peers`, recomputed whenever the registry or view changes.
    pub fn primary_id(&self) -> PeerId {
        self.primary_id
    }

    fn recompute_primary(&mut self) {
        self.primary_id = PeerId((self.view % self.total_peers() as u64) as u32);
    }
}
