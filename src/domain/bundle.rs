//! Verification bundle (VD)
//!
//! The canonical JSON object embedded in augmented PDFs and returned over
//! the wire. Key names and formats are fixed: lowercase hex without `0x`,
//! ISO-8601 UTC dates or null.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::fingerprint::epoch_to_iso;
use crate::error::IssuerError;

use super::{Batch, Job, Tenant};

/// Embedded verification bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationBundle {
    pub document_hash: Option<String>,
    pub document_fingerprint: Option<String>,
    pub fingerprint_hash: Option<String>,
    pub issuer_signature: Option<String>,
    pub merkle_leaf: Option<String>,
    pub expiry_date: Option<String>,
    pub invalidation_expiry: Option<String>,
    pub issuer_id: Option<String>,
    pub issuer_public_key: Option<String>,
    pub merkle_proof_intermediate: Option<Vec<String>>,
    pub merkle_root_intermediate: Option<String>,
    pub merkle_root_ultimate: Option<String>,
    pub merkle_proof_ultimate: Option<Vec<String>>,
    pub tx_hash: Option<String>,
    pub network: Option<String>,
}

impl VerificationBundle {
    /// Assemble the bundle for a job from its aggregate.
    ///
    /// Only meaningful once the job is generated; earlier stages have
    /// nothing worth embedding.
    pub fn build(job: &Job, batch: &Batch, tenant: &Tenant) -> Result<Self, IssuerError> {
        let (ed, ei) = batch.expiry_epochs();

        if job.issuer_signature.is_none() || job.merkle_leaf.is_none() {
            return Err(IssuerError::State {
                entity: format!("job {}", job.id),
                from: job.status.as_str().to_string(),
                to: "bundled".to_string(),
            });
        }

        Ok(Self {
            document_hash: job.document_hash.clone(),
            document_fingerprint: job.document_fingerprint.clone(),
            fingerprint_hash: job.fingerprint_hash.clone(),
            issuer_signature: job.issuer_signature.clone(),
            merkle_leaf: job.merkle_leaf.clone(),
            expiry_date: epoch_to_iso(ed),
            invalidation_expiry: epoch_to_iso(ei),
            issuer_id: Some(tenant.id.to_string()),
            issuer_public_key: batch
                .issuer_public_key
                .clone()
                .or_else(|| tenant.issuer_public_key.clone()),
            merkle_proof_intermediate: job.merkle_proof_intermediate.clone(),
            merkle_root_intermediate: batch.merkle_root.clone(),
            merkle_root_ultimate: batch.merkle_root_ultimate.clone(),
            merkle_proof_ultimate: batch.merkle_proof_ultimate.clone(),
            tx_hash: batch.tx_hash.clone(),
            network: batch.network.clone(),
        })
    }

    /// Whether a parsed JSON object looks like a bundle at all.
    pub fn value_looks_like_bundle(value: &Value) -> bool {
        const MARKERS: [&str; 5] = [
            "documentHash",
            "fingerprintHash",
            "merkleRootIntermediate",
            "issuerSignature",
            "merkleLeaf",
        ];
        value
            .as_object()
            .map(|map| MARKERS.iter().any(|key| map.contains_key(*key)))
            .unwrap_or(false)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}
