//! Document fingerprint codec
//!
//! The fingerprint binds a document hash to its two expiry timestamps:
//!
//! ```text
//! DI = document_hash(32) || BE64(expiry) || BE64(invalidation_expiry)
//! ```
//!
//! 48 bytes, reproducible bit-for-bit on any platform. A missing timestamp
//! encodes as 0 ("lifetime"). The fingerprint hash `keccak256(DI)` is the
//! digest the issuer actually signs, so any drift here breaks verification.

use chrono::{DateTime, NaiveDate, Utc};

use super::hash::{hex_to_hash, i64_be, keccak256, to_hex, Hash256};

/// Encoded fingerprint length in bytes
pub const FINGERPRINT_LEN: usize = 48;

/// Decoded document fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Keccak-256 of the original PDF bytes
    pub document_hash: Hash256,
    /// Document expiry, seconds since epoch; 0 means no expiry
    pub expiry: i64,
    /// Invalidation expiry, seconds since epoch; 0 means no expiry
    pub invalidation_expiry: i64,
}

impl Fingerprint {
    pub fn new(document_hash: Hash256, expiry: i64, invalidation_expiry: i64) -> Self {
        Self {
            document_hash,
            expiry,
            invalidation_expiry,
        }
    }

    /// Encode to the 48-byte wire form
    pub fn encode(&self) -> [u8; FINGERPRINT_LEN] {
        let mut out = [0u8; FINGERPRINT_LEN];
        out[..32].copy_from_slice(&self.document_hash);
        out[32..40].copy_from_slice(&i64_be(self.expiry));
        out[40..48].copy_from_slice(&i64_be(self.invalidation_expiry));
        out
    }

    /// Decode from the 48-byte wire form
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FINGERPRINT_LEN {
            return None;
        }
        let mut document_hash = [0u8; 32];
        document_hash.copy_from_slice(&bytes[..32]);
        let expiry = i64::from_be_bytes(bytes[32..40].try_into().ok()?);
        let invalidation_expiry = i64::from_be_bytes(bytes[40..48].try_into().ok()?);
        Some(Self {
            document_hash,
            expiry,
            invalidation_expiry,
        })
    }

    /// Decode from the 96-char hex form
    pub fn decode_hex(input: &str) -> Option<Self> {
        let stripped = input.strip_prefix("0x").unwrap_or(input);
        let bytes = hex::decode(stripped).ok()?;
        Self::decode(&bytes)
    }

    /// Lowercase hex of the encoded fingerprint (96 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// `keccak256(DI)` - the digest the issuer signs
    pub fn hash(&self) -> Hash256 {
        keccak256(&self.encode())
    }

    /// Hex form of [`Fingerprint::hash`]
    pub fn hash_hex(&self) -> String {
        to_hex(&self.hash())
    }

    /// Build from the stored hex document hash plus expiry epochs
    pub fn from_parts(document_hash_hex: &str, expiry: i64, invalidation_expiry: i64) -> Option<Self> {
        Some(Self::new(
            hex_to_hash(document_hash_hex)?,
            expiry,
            invalidation_expiry,
        ))
    }
}

/// Convert an optional timestamp to its encoded epoch form; `None` is 0.
pub fn expiry_epoch(value: Option<DateTime<Utc>>) -> i64 {
    value
        .map(|dt| dt.timestamp_millis().div_euclid(1000))
        .unwrap_or(0)
}

/// Parse an expiry supplied as epoch seconds or an ISO-8601 string.
///
/// The floor of `ms / 1000` is used so sub-second precision can never shift
/// the encoded value between implementations.
pub fn parse_expiry(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    if let Ok(epoch) = trimmed.parse::<i64>() {
        return Some(epoch);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis().div_euclid(1000));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0)?.and_utc();
        return Some(dt.timestamp_millis().div_euclid(1000));
    }
    None
}

/// Epoch seconds back to an ISO-8601 UTC string; 0 maps to `None`.
pub fn epoch_to_iso(epoch: i64) -> Option<String> {
    if epoch == 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(epoch, 0).map(|dt| dt.to_rfc3339())
}
