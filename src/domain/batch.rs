//! Batch entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::fingerprint::expiry_epoch;

use super::types::{BatchId, BatchStatus, SigningStatus, TemplateId, TenantId};

/// A batch of jobs sharing a template, expiries, and one intermediate root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub tenant_id: TenantId,
    pub template_id: TemplateId,
    pub status: BatchStatus,

    /// Document expiry; `None` means lifetime validity (encoded as 0)
    pub expiry_date: Option<DateTime<Utc>>,
    /// Invalidation expiry; `None` means lifetime validity (encoded as 0)
    pub invalidation_expiry: Option<DateTime<Utc>>,

    /// Verification key; may be supplied up front or captured from the first
    /// valid signature
    pub issuer_public_key: Option<String>,
    /// Optional batch-scoped auto-signing key; jobs sign during generation
    /// when present
    pub signing_key: Option<String>,

    /// Intermediate Merkle root over the batch's leaves; immutable once set
    pub merkle_root: Option<String>,
    /// Ultimate root across batches, set when the batch enters an anchor set
    pub merkle_root_ultimate: Option<String>,
    /// Proof from this batch's intermediate root to the ultimate root
    pub merkle_proof_ultimate: Option<Vec<String>>,

    pub tx_hash: Option<String>,
    pub network: Option<String>,

    pub signing_status: SigningStatus,
    pub finalized_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(tenant_id: TenantId, template_id: TemplateId) -> Self {
        Self {
            id: BatchId::new(),
            tenant_id,
            template_id,
            status: BatchStatus::Pending,
            expiry_date: None,
            invalidation_expiry: None,
            issuer_public_key: None,
            signing_key: None,
            merkle_root: None,
            merkle_root_ultimate: None,
            merkle_proof_ultimate: None,
            tx_hash: None,
            network: None,
            signing_status: SigningStatus::PendingSigning,
            finalized_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// The two expiries in encoded epoch form (0 = lifetime)
    pub fn expiry_epochs(&self) -> (i64, i64) {
        (
            expiry_epoch(self.expiry_date),
            expiry_epoch(self.invalidation_expiry),
        )
    }

    pub fn is_anchored(&self) -> bool {
        self.tx_hash.is_some()
    }

    pub fn has_intermediate_root(&self) -> bool {
        self.merkle_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_batch_defaults() {
        let batch = Batch::new(TenantId::new(), TemplateId::new());
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.signing_status, SigningStatus::PendingSigning);
        assert!(!batch.is_anchored());
        assert!(!batch.has_intermediate_root());
        assert_eq!(batch.expiry_epochs(), (0, 0));
    }

    #[test]
    fn test_expiry_epochs() {
        let mut batch = Batch::new(TenantId::new(), TemplateId::new());
        batch.expiry_date = Some(Utc.timestamp_opt(1699833600, 0).unwrap());
        assert_eq!(batch.expiry_epochs(), (1699833600, 0));
    }
}
