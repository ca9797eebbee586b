//! State store gateway
//!
//! The scheduler talks to persistence exclusively through this trait. Every
//! write is guarded by the expected current status so a stale worker cannot
//! overwrite newer state; claim-style reads are atomic so a job is never
//! processed twice concurrently.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

use crate::domain::{
    Batch, BatchId, HashedJob, Job, JobId, SignedJob, Template, TemplateId, Tenant, TenantId,
};
use crate::error::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    async fn create_tenant(&self, tenant: &Tenant) -> Result<()>;
    async fn create_template(&self, template: &Template) -> Result<()>;
    async fn create_batch(&self, batch: &Batch) -> Result<()>;
    async fn create_job(&self, job: &Job) -> Result<()>;

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>>;
    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>>;
    async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>>;
    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    // ------------------------------------------------------------------
    // Scheduler queues
    // ------------------------------------------------------------------

    /// Atomically transition up to `limit` of the oldest `Pending` jobs to
    /// `Processing` and return them. A losing concurrent worker observes
    /// zero rows and claims nothing.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>>;

    /// Jobs awaiting an external signature, in creation order.
    async fn find_pending_signature(&self, batch_id: BatchId) -> Result<Vec<Job>>;

    /// Generated jobs of a batch, in creation order. The leaf ordering of
    /// the intermediate tree is exactly this ordering.
    async fn find_signed_jobs(&self, batch_id: BatchId) -> Result<Vec<Job>>;

    /// Batches with at least one generated job, no intermediate root yet,
    /// and no jobs still travelling toward a signature.
    async fn find_batches_awaiting_mri(&self) -> Result<Vec<Batch>>;

    /// Finalized batches still lacking an anchored ultimate root, oldest
    /// `finalized_at` first.
    async fn find_batches_awaiting_mru(&self, limit: usize) -> Result<Vec<Batch>>;

    /// Generated jobs whose batch is anchored but which have no QR artifact.
    async fn find_jobs_awaiting_qr(&self, limit: usize) -> Result<Vec<Job>>;

    /// Generated jobs with a QR artifact and an original PDF but no
    /// augmented PDF.
    async fn find_jobs_awaiting_pdf_augment(&self, limit: usize) -> Result<Vec<Job>>;

    // ------------------------------------------------------------------
    // Guarded writes
    // ------------------------------------------------------------------

    /// `Processing -> PendingSigning`, writing the hash-stage fields in one
    /// transition.
    async fn mark_pending_signing(&self, job_id: JobId, hashed: &HashedJob) -> Result<()>;

    /// `Processing -> Generated` for the auto-signing path; hash and
    /// signature stages land together.
    async fn mark_generated(
        &self,
        job_id: JobId,
        hashed: &HashedJob,
        signed: &SignedJob,
    ) -> Result<()>;

    /// `PendingSigning -> Generated` on external signature intake. Returns
    /// the updated job; fails with a state error if the job is elsewhere.
    async fn record_signature(&self, job_id: JobId, signed: &SignedJob) -> Result<Job>;

    /// Terminal failure with message.
    async fn mark_job_failed(&self, job_id: JobId, message: &str) -> Result<()>;

    /// Capture the issuer key onto the batch if none is set yet.
    async fn set_batch_issuer_key(&self, batch_id: BatchId, public_key: &str) -> Result<()>;

    /// Write the intermediate root and per-job proofs; a no-op when the
    /// root is already set (the root is immutable). Marks the batch
    /// finalized.
    async fn set_batch_intermediate(
        &self,
        batch_id: BatchId,
        merkle_root: &str,
        proofs: &[(JobId, Vec<String>)],
    ) -> Result<bool>;

    /// Write the ultimate root and the batch's proof, mirrored onto its
    /// jobs. Rewritten on each anchoring attempt until one succeeds.
    async fn set_batch_ultimate(
        &self,
        batch_id: BatchId,
        merkle_root_ultimate: &str,
        proof: &[String],
    ) -> Result<()>;

    /// Record the successful anchor transaction.
    async fn set_batch_anchored(&self, batch_id: BatchId, tx_hash: &str, network: &str)
        -> Result<()>;

    /// Persist a regenerated verification bundle on a job.
    async fn set_job_bundle(&self, job_id: JobId, bundle: &Value) -> Result<()>;

    /// Drop every augmented-PDF path in the batch so augmentation re-runs
    /// with fresh anchor data.
    async fn clear_augmented_paths(&self, batch_id: BatchId) -> Result<()>;

    /// Record the QR artifact path and the compressed payload fragment.
    async fn set_job_qr(&self, job_id: JobId, path: &str, fragment: &str) -> Result<()>;

    /// Record the augmented PDF path.
    async fn set_job_augmented(&self, job_id: JobId, path: &str) -> Result<()>;

    /// Mark the batch completed when every job carries an augmented PDF and
    /// the batch is anchored; returns whether the transition happened.
    async fn complete_batch_if_done(&self, batch_id: BatchId) -> Result<bool>;
}
