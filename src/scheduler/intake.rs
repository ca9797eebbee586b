//! P2: external signature intake
//!
//! The signer is outside the system; this operation validates the submitted
//! signature against the job's fingerprint hash, captures the issuer key on
//! first use when the batch has none, derives the Merkle leaf, and moves the
//! job to `Generated`.

use tracing::info;

use crate::crypto::hash::{hex_to_bytes, keccak256, to_hex};
use crate::crypto::signing::{recover_public_key, verify_prehash};
use crate::domain::{Job, JobId, JobStatus, SignedJob};
use crate::error::{IssuerError, Result};

use super::IssuerContext;

pub(crate) async fn submit_signature(
    ctx: &IssuerContext,
    job_id: JobId,
    signature_hex: &str,
) -> Result<Job> {
    let job = ctx
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| IssuerError::Validation(format!("job {job_id} not found")))?;

    if job.status != JobStatus::PendingSigning {
        return Err(IssuerError::State {
            entity: format!("job {job_id}"),
            from: job.status.as_str().to_string(),
            to: "generated".to_string(),
        });
    }

    let fingerprint_hash = job.fingerprint_hash.clone().ok_or_else(|| {
        IssuerError::State {
            entity: format!("job {job_id}"),
            from: "pending_signing without fingerprint".to_string(),
            to: "generated".to_string(),
        }
    })?;

    let signature_bytes = hex_to_bytes(signature_hex)
        .ok_or_else(|| IssuerError::Crypto("signature is not valid hex".to_string()))?;
    let signature = hex::encode(&signature_bytes);

    let batch = ctx
        .store
        .get_batch(job.batch_id)
        .await?
        .ok_or_else(|| IssuerError::Validation(format!("batch {} not found", job.batch_id)))?;
    let tenant = ctx.store.get_tenant(batch.tenant_id).await?;

    let known_key = batch
        .issuer_public_key
        .clone()
        .or_else(|| tenant.and_then(|t| t.issuer_public_key))
        .or_else(|| ctx.config.env_issuer_public_key.clone());

    match known_key {
        Some(key) => {
            if !verify_prehash(&fingerprint_hash, &signature, &key) {
                return Err(IssuerError::Crypto(
                    "signature does not verify against the issuer key".to_string(),
                ));
            }
        }
        None => {
            // First valid recoverable signature pins the batch's key.
            if let Some(recovered) = recover_public_key(&fingerprint_hash, &signature) {
                if verify_prehash(&fingerprint_hash, &signature, &recovered) {
                    ctx.store.set_batch_issuer_key(batch.id, &recovered).await?;
                    info!(batch = %batch.id, "issuer key captured from first signature");
                }
            }
        }
    }

    let signed = SignedJob {
        merkle_leaf: to_hex(&keccak256(&signature_bytes)),
        issuer_signature: signature,
    };

    let updated = ctx.store.record_signature(job_id, &signed).await?;
    info!(job = %job_id, batch = %batch.id, "signature recorded, leaf derived");
    Ok(updated)
}
