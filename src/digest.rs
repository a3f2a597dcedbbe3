/***************************************************************************************************
Pure digest function. Treated as a black box by the engine: anything producing a deterministic,
fixed-width hex string over the record's fields satisfies the contract.
***************************************************************************************************/

/// Hashes `(index, data, timestamp, prev_digest)` in that order, matching the field order of the
/// reference implementation, and returns the digest as a lowercase hex string.
pub fn hash(index: u64, data: &[u8], timestamp: i64, prev_digest: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(data);
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(prev_digest.as_bytes());
    hasher.finalize().to_hex().to_string()
}
