//! Keccak-256 hashing with deterministic hex representation
//!
//! Every hash in the issuance pipeline is a Keccak-256 digest. Stored and
//! wire representations are lowercase hex without a `0x` prefix; the prefix
//! is added only at the chain boundary where a `bytes32` is expected.

use sha3::{Digest, Keccak256};

/// 32-byte Keccak-256 hash
pub type Hash256 = [u8; 32];

/// Compute the Keccak-256 digest of raw bytes
pub fn keccak256(data: &[u8]) -> Hash256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the Keccak-256 digest of a concatenation without allocating
pub fn keccak256_concat(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Lowercase hex, no prefix - the storage form
pub fn to_hex(hash: &Hash256) -> String {
    hex::encode(hash)
}

/// `0x`-prefixed lowercase hex - the chain boundary form
pub fn to_bytes32_hex(hash: &Hash256) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parse a 32-byte hash from hex, tolerating an optional `0x` prefix
pub fn hex_to_hash(input: &str) -> Option<Hash256> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    let bytes = hex::decode(stripped).ok()?;
    bytes.try_into().ok()
}

/// Decode arbitrary hex, tolerating an optional `0x` prefix
pub fn hex_to_bytes(input: &str) -> Option<Vec<u8>> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(stripped).ok()
}

/// Encode a u64 as 8 bytes big-endian
#[inline]
pub fn u64_be(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Encode an i64 as 8 bytes big-endian
#[inline]
pub fn i64_be(n: i64) -> [u8; 8] {
    n.to_be_bytes()
}
