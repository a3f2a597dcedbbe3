/***************************************************************************************************
The PBFT engine: proposal state tables keyed by the record's timestamp, the pre-prepare/prepare/
commit phase transitions, and the Byzantine/duplicate guards. The engine never touches the network
or the chain directly; callers (the replica) execute whatever `EngineAction` comes back.
***************************************************************************************************/

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::record::Record;
use crate::registry::PeerId;
use crate::wire::Message;

/// What the replica should do in response to processing an inbound message.
pub enum EngineAction {
    /// Nothing to do: the message was dropped (duplicate, Byzantine-silenced, or didn't cross a
    /// quorum threshold) or was a simple accept with no outbound message.
    None,
    /// Broadcast `Message` to every known peer.
    Broadcast(Message),
    /// The commit quorum was just reached for `record`; the caller must append it to the chain.
    Append(Record),
}

/// One entry in the per-proposal state tables (§3: `preprepare`/`prepare`/`commit`), keyed by the
/// record's timestamp.
#[derive(Debug, Default)]
struct ProposalState {
    preprepare: Option<Record>,
    prepare: HashSet<PeerId>,
    commit: HashSet<PeerId>,
}

/// Replica-local PBFT state: one `ProposalState` per timestamp seen so far, plus the set of keys
/// already committed (sealed against re-processing) and the fault-injection flag.
#[derive(Debug)]
pub struct Engine {
    self_id: PeerId,
    is_byzantine: bool,
    proposals: HashMap<i64, ProposalState>,
    committed: HashSet<i64>,
}

impl Engine {
    /// A fresh engine for replica `self_id`, not Byzantine, with no proposals in flight.
    pub fn new(self_id: PeerId) -> Self {
        Engine {
            self_id,
            is_byzantine: false,
            proposals: HashMap::new(),
            committed: HashSet::new(),
        }
    }

    /// Current fault-injection state.
    pub fn is_byzantine(&self) -> bool {
        self.is_byzantine
    }

    /// Flips the fault-injection flag. Protocol messages are silently dropped while set; CLI
    /// commands (submit, print-chain, toggle) are unaffected.
    pub fn set_byzantine(&mut self, byzantine: bool) {
        self.is_byzantine = byzantine;
    }

    /// Number of keys that have reached the commit quorum on this replica.
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Builds a pre-prepare record for `data`; does not mutate any proposal table. The caller (the
    /// leader) is responsible for broadcasting the resulting `PrePrepare` message; the leader
    /// never runs it back through `on_preprepare` itself (see open question in the design notes).
    pub fn propose(&self, index: u64, timestamp: i64, data: Vec<u8>, view: u64) -> (Record, Message) {
        let record = Record::new(index, timestamp, data);
        let message = Message::PrePrepare {
            record: record.clone(),
            view,
        };
        (record, message)
    }

    /// Handles an inbound pre-prepare: stores it, resets commit tracking for the key, and
    /// broadcasts a `Prepare` vote.
    pub fn on_preprepare(&mut self, record: Record, view: u64) -> EngineAction {
        let key = record.timestamp;
        if !self.should_process(key) {
            return EngineAction::None;
        }

        debug!(target: "engine", "replica {} accepted pre-prepare for key {} (index {})", self.self_id, key, record.index);

        let entry = self.proposals.entry(key).or_default();
        entry.preprepare = Some(record.clone());
        entry.commit.clear();

        EngineAction::Broadcast(Message::Prepare {
            record,
            view,
            peer_id: self.self_id,
        })
    }

    /// Handles an inbound prepare vote. Once `prepare[key]` crosses the prepare quorum
    /// (`(total_peers / 3) * 2 - 1`, which excludes this replica's own vote), broadcasts a
    /// `Commit` vote and records it in this replica's own `commit[key]` tally: the commit quorum
    /// is inclusive of self (§3), unlike the prepare quorum.
    pub fn on_prepare(&mut self, record: Record, view: u64, from: PeerId, total_peers: u32) -> EngineAction {
        let key = record.timestamp;
        if !self.should_process(key) {
            return EngineAction::None;
        }

        let entry = self.proposals.entry(key).or_default();
        entry.prepare.insert(from);

        let f = total_peers / 3;
        let threshold = (f * 2).saturating_sub(1) as usize;
        if entry.prepare.len() >= threshold {
            debug!(target: "engine", "replica {} reached prepare quorum for key {} ({} votes, threshold {})", self.self_id, key, entry.prepare.len(), threshold);
            entry.commit.insert(self.self_id);
            EngineAction::Broadcast(Message::Commit {
                record,
                view,
                peer_id: self.self_id,
            })
        } else {
            EngineAction::None
        }
    }

    /// Handles an inbound commit vote. Once `commit[key]` crosses the commit quorum
    /// (`(total_peers / 3) * 2 + 1`) and the key hasn't already been committed, seals the key and
    /// tells the caller to append the record.
    pub fn on_commit(&mut self, record: Record, _view: u64, from: PeerId, total_peers: u32) -> EngineAction {
        let key = record.timestamp;
        if !self.should_process(key) {
            return EngineAction::None;
        }

        let entry = self.proposals.entry(key).or_default();
        entry.commit.insert(from);

        let f = total_peers / 3;
        let threshold = (f * 2 + 1) as usize;
        if entry.commit.len() >= threshold {
            debug!(target: "engine", "replica {} reached commit quorum for key {} ({} votes, threshold {})", self.self_id, key, entry.commit.len(), threshold);
            self.committed.insert(key);
            // usually already present from on_prepare's self-vote; harmless if not (e.g. a
            // commit quorum crossed entirely by external votes before this replica prepared)
            self.proposals.get_mut(&key).unwrap().commit.insert(self.self_id);
            EngineAction::Append(record)
        } else {
            EngineAction::None
        }
    }

    /// The guard evaluated before any protocol message is processed: committed keys are dropped
    /// (already sealed), and a Byzantine replica drops everything silently.
    fn should_process(&self, key: i64) -> bool {
        if self.committed.contains(&key) {
            debug!(target: "engine", "replica {} dropping message for already-committed key {}", self.self_id, key);
            return false;
        }
        if self.is_byzantine {
            warn!(target: "engine", "replica {} is byzantine, dropping protocol message for key {}", self.self_id, key);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(timestamp: i64) -> Record {
        Record::new(1, timestamp, b"x".to_vec())
    }

    #[test]
    fn preprepare_broadcasts_prepare() {
        let mut engine = Engine::new(PeerId(0));
        match engine.on_preprepare(rec(1), 0) {
            EngineAction::Broadcast(Message::Prepare { peer_id, .. }) => assert_eq!(peer_id, PeerId(0)),
            _ => panic!("expected a Prepare broadcast"),
        }
    }

    #[test]
    fn prepare_quorum_escalates_to_commit() {
        let mut engine = Engine::new(PeerId(0));
        // n=4 -> f=1, threshold = 2*1-1 = 1
        assert!(matches!(engine.on_prepare(rec(1), 0, PeerId(1), 4), EngineAction::Broadcast(Message::Commit { .. })));
    }

    #[test]
    fn reaching_prepare_quorum_counts_own_commit_vote() {
        // commit-quorum is inclusive of self (§3), unlike prepare-quorum: a three-replica cluster
        // with no Byzantine replicas needs exactly self + the other two honest votes to reach the
        // commit threshold of 3, which is only possible if broadcasting a commit also counts it.
        let mut engine = Engine::new(PeerId(0));
        engine.on_prepare(rec(1), 0, PeerId(1), 3);
        let entry = engine.proposals.get(&1).unwrap();
        assert!(entry.commit.contains(&PeerId(0)));

        assert!(matches!(engine.on_commit(rec(1), 0, PeerId(1), 3), EngineAction::None));
        assert!(matches!(engine.on_commit(rec(1), 0, PeerId(2), 3), EngineAction::Append(_)));
    }

    #[test]
    fn commit_quorum_appends_once() {
        let mut engine = Engine::new(PeerId(0));
        // n=4 -> f=1, threshold = 2*1+1 = 3
        assert!(matches!(engine.on_commit(rec(1), 0, PeerId(1), 4), EngineAction::None));
        assert!(matches!(engine.on_commit(rec(1), 0, PeerId(2), 4), EngineAction::None));
        assert!(matches!(engine.on_commit(rec(1), 0, PeerId(3), 4), EngineAction::Append(_)));
        assert_eq!(engine.committed_len(), 1);

        // replays after commit are dropped
        assert!(matches!(engine.on_commit(rec(1), 0, PeerId(1), 4), EngineAction::None));
    }

    #[test]
    fn byzantine_drops_everything() {
        let mut engine = Engine::new(PeerId(3));
        engine.set_byzantine(true);
        assert!(matches!(engine.on_preprepare(rec(1), 0), EngineAction::None));
        assert!(matches!(engine.on_prepare(rec(1), 0, PeerId(1), 4), EngineAction::None));
        assert!(matches!(engine.on_commit(rec(1), 0, PeerId(1), 4), EngineAction::None));
    }

    #[test]
    fn a_prepare_arriving_before_its_preprepare_is_still_counted() {
        // tables are created on first reference (§5): a prepare vote for a key this replica
        // hasn't seen a pre-prepare for yet must not be dropped.
        let mut engine = Engine::new(PeerId(0));
        assert!(matches!(engine.on_prepare(rec(1), 0, PeerId(1), 4), EngineAction::None));
        let entry = engine.proposals.get(&1).unwrap();
        assert!(entry.prepare.contains(&PeerId(1)));
        assert!(entry.preprepare.is_none());

        // the late pre-prepare still broadcasts a fresh prepare vote; it doesn't see or retract
        // the vote that already arrived out of order.
        assert!(matches!(engine.on_preprepare(rec(1), 0), EngineAction::Broadcast(Message::Prepare { .. })));
        let entry = engine.proposals.get(&1).unwrap();
        assert!(entry.preprepare.is_some());
        assert!(entry.prepare.contains(&PeerId(1)));
    }

    #[test]
    fn duplicate_votes_are_counted_once_via_set_semantics() {
        let mut engine = Engine::new(PeerId(0));
        for _ in 0..50 {
            engine.on_prepare(rec(1), 0, PeerId(1), 4);
        }
        // still only one distinct voter, so the entry's prepare set has size 1
        let entry = engine.proposals.get(&1).unwrap();
        assert_eq!(entry.prepare.len(), 1);
    }
}
