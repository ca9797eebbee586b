//! Job entity and staged crypto payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{BatchId, JobId, JobStatus};

/// A single certificate job within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub batch_id: BatchId,
    /// Template parameter values
    pub data: Value,
    pub status: JobStatus,

    /// Stored original PDF
    pub certificate_path: Option<String>,
    /// Stored QR PNG artifact
    pub qr_code_path: Option<String>,
    /// Stored augmented PDF
    pub certificate_with_qr_path: Option<String>,

    /// keccak256 of the original PDF bytes, hex
    pub document_hash: Option<String>,
    /// Content-canonical hash over the text layer, hex; best effort
    pub data_hash: Option<String>,
    /// 48-byte fingerprint, hex
    pub document_fingerprint: Option<String>,
    /// keccak256 of the fingerprint - the signed digest, hex
    pub fingerprint_hash: Option<String>,
    /// Issuer signature over the fingerprint hash, hex
    pub issuer_signature: Option<String>,
    /// keccak256 of the signature bytes - the Merkle leaf, hex
    pub merkle_leaf: Option<String>,
    /// Sibling path to the batch's intermediate root
    pub merkle_proof_intermediate: Option<Vec<String>>,
    /// Mirror of the batch's proof to the ultimate root
    pub merkle_proof_ultimate: Option<Vec<String>>,

    /// Embedded verification bundle, regenerated after anchoring
    pub verification_bundle: Option<Value>,
    /// Compressed QR payload (base64url of raw deflate)
    pub qr_payload_fragment: Option<String>,

    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(batch_id: BatchId, data: Value) -> Self {
        Self {
            id: JobId::new(),
            batch_id,
            data,
            status: JobStatus::Pending,
            certificate_path: None,
            qr_code_path: None,
            certificate_with_qr_path: None,
            document_hash: None,
            data_hash: None,
            document_fingerprint: None,
            fingerprint_hash: None,
            issuer_signature: None,
            merkle_leaf: None,
            merkle_proof_intermediate: None,
            merkle_proof_ultimate: None,
            verification_bundle: None,
            qr_payload_fragment: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

/// Hash-stage fields, written together in a single transition so a job can
/// never carry a fingerprint without its document hash.
#[derive(Debug, Clone)]
pub struct HashedJob {
    pub certificate_path: String,
    pub document_hash: String,
    pub data_hash: Option<String>,
    pub document_fingerprint: String,
    pub fingerprint_hash: String,
}

/// Signature-stage fields; the leaf exists only alongside its signature.
#[derive(Debug, Clone)]
pub struct SignedJob {
    pub issuer_signature: String,
    pub merkle_leaf: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_job_is_pending_and_bare() {
        let job = Job::new(BatchId::new(), json!({"name": "A"}));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.document_hash.is_none());
        assert!(job.merkle_leaf.is_none());
        assert!(job.certificate_with_qr_path.is_none());
    }
}
