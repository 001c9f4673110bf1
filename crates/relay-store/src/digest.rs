//! SHA-256 helpers.
//!
//! Artifact digests are rendered as `sha256:` followed by 64 lowercase hex
//! characters. Index entries are keyed by the first 8 hex characters of the
//! digest of the idempotency key.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

use relay_contracts::event::Artifact;

/// Length of the idempotency-key hash used for index file names.
pub const IK_HASH_LEN: usize = 8;

/// `sha256:<hex>` of `bytes`.
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("{}{}", Artifact::SHA256_PREFIX, hex::encode(Sha256::digest(bytes)))
}

/// Stream `reader` through SHA-256, returning the prefixed digest and the
/// number of bytes read.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let size = io::copy(&mut reader, &mut hasher)?;
    Ok((
        format!("{}{}", Artifact::SHA256_PREFIX, hex::encode(hasher.finalize())),
        size,
    ))
}

/// Short hash of an idempotency key. Collisions are expected to be rare but
/// possible; readers must verify the key stored in the receipt.
pub fn ik_hash(idempotency_key: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(idempotency_key.as_bytes()));
    hex.truncate(IK_HASH_LEN);
    hex
}
