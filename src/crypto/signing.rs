//! Issuer signing and verification over secp256k1
//!
//! Signatures arrive from external signers in several encodings: ASN.1 DER,
//! compact 64-byte `r || s`, and Ethereum-style 65-byte `r || s || v` with
//! `v` in {0, 1, 27, 28}. The message is always a prehashed 32-byte digest
//! (the fingerprint hash); no additional hashing is applied here.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use super::hash::{hex_to_bytes, hex_to_hash, Hash256};

/// Error type for signing operations
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("invalid public key format")]
    InvalidPublicKeyFormat,

    #[error("invalid secret key format")]
    InvalidSecretKeyFormat,

    #[error("invalid digest format")]
    InvalidDigestFormat,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("signature is not recoverable")]
    NotRecoverable,
}

/// A parsed signature plus the recovery id when the 65-byte form carried one.
struct ParsedSignature {
    signature: Signature,
    recovery_id: Option<RecoveryId>,
}

fn parse_signature(sig_hex: &str) -> Result<ParsedSignature, SigningError> {
    let bytes = hex_to_bytes(sig_hex).ok_or(SigningError::InvalidSignatureFormat)?;

    let (mut signature, mut recovery_id) = match bytes.len() {
        64 => {
            let signature = Signature::from_slice(&bytes)
                .map_err(|_| SigningError::InvalidSignatureFormat)?;
            (signature, None)
        }
        65 => {
            let signature = Signature::from_slice(&bytes[..64])
                .map_err(|_| SigningError::InvalidSignatureFormat)?;
            let v = match bytes[64] {
                v @ (0 | 1) => v,
                v @ (27 | 28) => v - 27,
                _ => return Err(SigningError::InvalidSignatureFormat),
            };
            let recovery_id =
                RecoveryId::from_byte(v).ok_or(SigningError::InvalidSignatureFormat)?;
            (signature, Some(recovery_id))
        }
        _ => {
            let signature =
                Signature::from_der(&bytes).map_err(|_| SigningError::InvalidSignatureFormat)?;
            (signature, None)
        }
    };

    // Normalize high-S signatures; the recovery parity flips with S.
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        if let Some(recid) = recovery_id {
            recovery_id = Some(RecoveryId::new(!recid.is_y_odd(), recid.is_x_reduced()));
        }
    }

    Ok(ParsedSignature {
        signature,
        recovery_id,
    })
}

fn parse_public_key(pub_key_hex: &str) -> Result<VerifyingKey, SigningError> {
    let mut bytes = hex_to_bytes(pub_key_hex).ok_or(SigningError::InvalidPublicKeyFormat)?;

    // Raw 64-byte x || y is accepted; prepend the uncompressed SEC1 tag.
    if bytes.len() == 64 {
        let mut tagged = Vec::with_capacity(65);
        tagged.push(0x04);
        tagged.extend_from_slice(&bytes);
        bytes = tagged;
    }

    VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| SigningError::InvalidPublicKeyFormat)
}

fn parse_digest(hash_hex: &str) -> Result<Hash256, SigningError> {
    hex_to_hash(hash_hex).ok_or(SigningError::InvalidDigestFormat)
}

/// Verify a signature against a prehashed digest.
///
/// Returns `false` on any parse error: a malformed signature, key, or digest
/// is indistinguishable from an invalid one at the call sites.
pub fn verify_prehash(hash_hex: &str, sig_hex: &str, pub_key_hex: &str) -> bool {
    let digest = match parse_digest(hash_hex) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let parsed = match parse_signature(sig_hex) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let key = match parse_public_key(pub_key_hex) {
        Ok(k) => k,
        Err(_) => return false,
    };

    key.verify_prehash(&digest, &parsed.signature).is_ok()
}

/// Recover the uncompressed public key from an Ethereum-style 65-byte
/// signature. Returns `None` for the 64-byte and DER forms, which carry no
/// recovery information.
pub fn recover_public_key(hash_hex: &str, sig_hex: &str) -> Option<String> {
    let digest = parse_digest(hash_hex).ok()?;
    let parsed = parse_signature(sig_hex).ok()?;
    let recovery_id = parsed.recovery_id?;

    let key = VerifyingKey::recover_from_prehash(&digest, &parsed.signature, recovery_id).ok()?;
    Some(hex::encode(key.to_encoded_point(false).as_bytes()))
}

/// Sign a prehashed digest, returning hex `r || s` with both components
/// left-padded to 32 bytes.
pub fn sign_prehash(hash_hex: &str, priv_hex: &str) -> Result<String, SigningError> {
    let digest = parse_digest(hash_hex)?;
    let key_bytes = hex_to_bytes(priv_hex).ok_or(SigningError::InvalidSecretKeyFormat)?;
    let signing_key =
        SigningKey::from_slice(&key_bytes).map_err(|_| SigningError::InvalidSecretKeyFormat)?;

    let signature: Signature = signing_key
        .sign_prehash(&digest)
        .map_err(|_| SigningError::VerificationFailed)?;

    Ok(hex::encode(signature.to_bytes()))
}

/// Derive the uncompressed public key (hex, no prefix) for a private key.
pub fn public_key_for_private(priv_hex: &str) -> Result<String, SigningError> {
    let key_bytes = hex_to_bytes(priv_hex).ok_or(SigningError::InvalidSecretKeyFormat)?;
    let signing_key =
        SigningKey::from_slice(&key_bytes).map_err(|_| SigningError::InvalidSecretKeyFormat)?;
    Ok(hex::encode(
        signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes(),
    ))
}
