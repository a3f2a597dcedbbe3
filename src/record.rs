/***************************************************************************************************
Record and Chain. The chain is append-only: `append` always relinks and rehashes the incoming
record against the current tail before pushing it, so the hash chain is consistent by construction.
***************************************************************************************************/

use serde::{Deserialize, Serialize};

use crate::digest;

/// A single entry in the ledger. `digest` is always `H(index, data, timestamp, prev_digest)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Position in the chain; monotonic from 0.
    pub index: u64,
    /// Creation timestamp (nanoseconds since epoch); also the proposal key in the engine.
    pub timestamp: i64,
    /// Opaque payload.
    pub data: Vec<u8>,
    /// Digest of the preceding record ("0" for genesis).
    pub prev_digest: String,
    /// This record's own digest.
    pub digest: String,
}

impl Record {
    /// Builds a new, unlinked record. `prev_digest` is "0" and `digest` is computed against it;
    /// callers that append through [`Chain::append`] don't need to set `prev_digest` correctly
    /// up front, since append relinks it anyway.
    pub fn new(index: u64, timestamp: i64, data: Vec<u8>) -> Self {
        let prev_digest = "0".to_string();
        let digest = digest::hash(index, &data, timestamp, &prev_digest);
        Record {
            index,
            timestamp,
            data,
            prev_digest,
            digest,
        }
    }

    /// The genesis record: index 0, fixed payload, anchored to "0".
    pub fn genesis(timestamp: i64) -> Self {
        Record::new(0, timestamp, b"Genesis".to_vec())
    }

    /// Rebuilds a genesis record from wire-transmitted fields (used by late joiners).
    pub fn from_genesis_fields(timestamp: i64, data: Vec<u8>, prev_digest: String, digest: String) -> Self {
        Record {
            index: 0,
            timestamp,
            data,
            prev_digest,
            digest,
        }
    }

    fn relink(&mut self, prev_digest: &str) {
        self.prev_digest = prev_digest.to_string();
        self.digest = digest::hash(self.index, &self.data, self.timestamp, &self.prev_digest);
    }

    fn recomputed_digest(&self) -> String {
        digest::hash(self.index, &self.data, self.timestamp, &self.prev_digest)
    }
}

/// An ordered, hash-linked sequence of records. Records[0] is always genesis.
#[derive(Debug, Clone)]
pub struct Chain {
    records: Vec<Record>,
}

impl Chain {
    /// Creates a chain whose sole record is a freshly minted genesis record.
    pub fn genesis(timestamp: i64) -> Self {
        Chain {
            records: vec![Record::genesis(timestamp)],
        }
    }

    /// Creates a chain from a genesis record received over the wire.
    pub fn from_genesis(genesis: Record) -> Self {
        Chain {
            records: vec![genesis],
        }
    }

    /// Appends `record` to the tail, relinking its `prev_digest` and recomputing its `digest`
    /// against the current last record. Does not deduplicate; call sites (the engine) are
    /// responsible for only calling this once per proposal key.
    pub fn append(&mut self, mut record: Record) {
        let prev_digest = self.tail().digest.clone();
        record.relink(&prev_digest);
        self.records.push(record);
    }

    /// The most recently appended record.
    pub fn tail(&self) -> &Record {
        self.records.last().expect("chain always has a genesis record")
    }

    /// Number of records, including genesis.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// The genesis record (fields only, for wire transmission).
    pub fn genesis_record(&self) -> &Record {
        &self.records[0]
    }

    /// Read-only view over the full chain.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// True iff every digest recomputes and every prev-link matches the predecessor's digest.
    pub fn validate(&self) -> bool {
        for i in 1..self.records.len() {
            let (prev, cur) = (&self.records[i - 1], &self.records[i]);
            if cur.digest != cur.recomputed_digest() {
                return false;
            }
            if cur.prev_digest != prev.digest {
                return false;
            }
            if cur.index as usize != i {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_chain_validates() {
        let chain = Chain::genesis(0);
        assert_eq!(chain.len(), 1);
        assert!(chain.validate());
        assert_eq!(chain.genesis_record().prev_digest, "0");
        assert_eq!(chain.genesis_record().data, b"Genesis");
    }

    #[test]
    fn append_relinks_and_validates() {
        let mut chain = Chain::genesis(0);
        chain.append(Record::new(1, 1, b"hello".to_vec()));
        assert_eq!(chain.len(), 2);
        assert!(chain.validate());
        assert_eq!(chain.tail().prev_digest, chain.records()[0].digest);
    }

    #[test]
    fn tampering_breaks_validation() {
        let mut chain = Chain::genesis(0);
        chain.append(Record::new(1, 1, b"hello".to_vec()));
        // directly corrupt the payload without recomputing the digest
        chain.records[1].data = b"tampered".to_vec();
        assert!(!chain.validate());
    }

    #[test]
    fn late_joiner_reconstructs_genesis_from_wire_fields() {
        let original = Chain::genesis(7);
        let g = original.genesis_record().clone();
        let rebuilt =
            Record::from_genesis_fields(g.timestamp, g.data.clone(), g.prev_digest.clone(), g.digest.clone());
        let chain = Chain::from_genesis(rebuilt);
        assert!(chain.validate());
        assert_eq!(chain.genesis_record().digest, g.digest);
    }
}
