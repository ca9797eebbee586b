//! Cryptographic kernel for certificate issuance
//!
//! - [`hash`] - Keccak-256 primitives and hex plumbing
//! - [`signing`] - secp256k1 sign/verify/recover over prehashed digests
//! - [`fingerprint`] - deterministic document fingerprint codec
//! - [`canonical`] - canonical JSON for every hashed object
//! - [`content_hash`] - token-bag content hash over the PDF text layer

pub mod canonical;
pub mod content_hash;
pub mod fingerprint;
pub mod hash;
pub mod signing;

pub use canonical::{canonical_json, canonical_json_hash};
pub use content_hash::content_hash;
pub use fingerprint::{Fingerprint, FINGERPRINT_LEN};
pub use hash::{hex_to_hash, keccak256, to_bytes32_hex, to_hex, Hash256};
pub use signing::{recover_public_key, sign_prehash, verify_prehash, SigningError};
