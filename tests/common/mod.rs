//! Shared test doubles: in-memory state store and storage, stubbed chain.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use justifai_issuer::anchor::{AnchorClient, AnchorReceipt, AnchorVerification};
use justifai_issuer::crypto::hash::Hash256;
use justifai_issuer::domain::{
    Batch, BatchId, BatchStatus, HashedJob, Job, JobId, JobStatus, SignedJob, SigningStatus,
    Template, TemplateId, Tenant, TenantId,
};
use justifai_issuer::error::{IssuerError, Result};
use justifai_issuer::infra::storage::{object_key, StoreOptions};
use justifai_issuer::infra::{StateStore, StorageGateway};

/// Deterministic secp256k1 test key
pub const TEST_SIGNING_KEY: &str =
    "4646464646464646464646464646464646464646464646464646464646464646";

// ---------------------------------------------------------------------------
// In-memory state store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemStateStore {
    tenants: Mutex<Vec<Tenant>>,
    templates: Mutex<Vec<Template>>,
    batches: Mutex<Vec<Batch>>,
    jobs: Mutex<Vec<Job>>,
}

impl MemStateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state_err(entity: String, from: &str, to: &str) -> IssuerError {
        IssuerError::State {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[async_trait]
impl StateStore for MemStateStore {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.tenants.lock().unwrap().push(tenant.clone());
        Ok(())
    }

    async fn create_template(&self, template: &Template) -> Result<()> {
        self.templates.lock().unwrap().push(template.clone());
        Ok(())
    }

    async fn create_batch(&self, batch: &Batch) -> Result<()> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>> {
        Ok(self
            .batches
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned())
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut claimed = Vec::new();
        for job in jobs.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Processing;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn find_pending_signature(&self, batch_id: BatchId) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.batch_id == batch_id && j.status == JobStatus::PendingSigning)
            .cloned()
            .collect())
    }

    async fn find_signed_jobs(&self, batch_id: BatchId) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.batch_id == batch_id && j.status == JobStatus::Generated)
            .cloned()
            .collect())
    }

    async fn find_batches_awaiting_mri(&self) -> Result<Vec<Batch>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(self
            .batches
            .lock()
            .unwrap()
            .iter()
            .filter(|b| {
                if b.merkle_root.is_some() {
                    return false;
                }
                let of_batch: Vec<_> = jobs.iter().filter(|j| j.batch_id == b.id).collect();
                of_batch.iter().any(|j| j.status == JobStatus::Generated)
                    && !of_batch.iter().any(|j| {
                        matches!(
                            j.status,
                            JobStatus::Pending | JobStatus::Processing | JobStatus::PendingSigning
                        )
                    })
            })
            .cloned()
            .collect())
    }

    async fn find_batches_awaiting_mru(&self, limit: usize) -> Result<Vec<Batch>> {
        let mut found: Vec<Batch> = self
            .batches
            .lock()
            .unwrap()
            .iter()
            .filter(|b| {
                b.signing_status == SigningStatus::Finalized
                    && (b.merkle_root_ultimate.is_none() || b.tx_hash.is_none())
            })
            .cloned()
            .collect();
        found.sort_by_key(|b| b.finalized_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn find_jobs_awaiting_qr(&self, limit: usize) -> Result<Vec<Job>> {
        let batches = self.batches.lock().unwrap();
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| {
                j.status == JobStatus::Generated
                    && j.qr_code_path.is_none()
                    && batches
                        .iter()
                        .find(|b| b.id == j.batch_id)
                        .map(|b| b.merkle_root_ultimate.is_some() && b.tx_hash.is_some())
                        .unwrap_or(false)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_jobs_awaiting_pdf_augment(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| {
                j.status == JobStatus::Generated
                    && j.qr_code_path.is_some()
                    && j.certificate_with_qr_path.is_none()
                    && j.certificate_path.is_some()
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_pending_signing(&self, job_id: JobId, hashed: &HashedJob) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
            .ok_or_else(|| {
                Self::state_err(format!("job {job_id}"), "processing", "pending_signing")
            })?;
        apply_hashed(job, hashed);
        job.status = JobStatus::PendingSigning;
        Ok(())
    }

    async fn mark_generated(
        &self,
        job_id: JobId,
        hashed: &HashedJob,
        signed: &SignedJob,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
            .ok_or_else(|| Self::state_err(format!("job {job_id}"), "processing", "generated"))?;
        apply_hashed(job, hashed);
        job.issuer_signature = Some(signed.issuer_signature.clone());
        job.merkle_leaf = Some(signed.merkle_leaf.clone());
        job.status = JobStatus::Generated;
        Ok(())
    }

    async fn record_signature(&self, job_id: JobId, signed: &SignedJob) -> Result<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::PendingSigning)
            .ok_or_else(|| {
                Self::state_err(format!("job {job_id}"), "pending_signing", "generated")
            })?;
        job.issuer_signature = Some(signed.issuer_signature.clone());
        job.merkle_leaf = Some(signed.merkle_leaf.clone());
        job.status = JobStatus::Generated;
        Ok(job.clone())
    }

    async fn mark_job_failed(&self, job_id: JobId, message: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Failed;
            job.error_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn set_batch_issuer_key(&self, batch_id: BatchId, public_key: &str) -> Result<()> {
        let mut batches = self.batches.lock().unwrap();
        if let Some(batch) = batches.iter_mut().find(|b| b.id == batch_id) {
            if batch.issuer_public_key.is_none() {
                batch.issuer_public_key = Some(public_key.to_string());
            }
        }
        Ok(())
    }

    async fn set_batch_intermediate(
        &self,
        batch_id: BatchId,
        merkle_root: &str,
        proofs: &[(JobId, Vec<String>)],
    ) -> Result<bool> {
        {
            let mut batches = self.batches.lock().unwrap();
            let batch = batches
                .iter_mut()
                .find(|b| b.id == batch_id)
                .ok_or_else(|| IssuerError::Validation(format!("batch {batch_id} not found")))?;
            if batch.merkle_root.is_some() {
                return Ok(false);
            }
            batch.merkle_root = Some(merkle_root.to_string());
            batch.signing_status = SigningStatus::Finalized;
            batch.finalized_at = Some(Utc::now());
            batch.status = BatchStatus::Processing;
        }
        let mut jobs = self.jobs.lock().unwrap();
        for (job_id, proof) in proofs {
            if let Some(job) = jobs.iter_mut().find(|j| j.id == *job_id) {
                job.merkle_proof_intermediate = Some(proof.clone());
            }
        }
        Ok(true)
    }

    async fn set_batch_ultimate(
        &self,
        batch_id: BatchId,
        merkle_root_ultimate: &str,
        proof: &[String],
    ) -> Result<()> {
        {
            let mut batches = self.batches.lock().unwrap();
            if let Some(batch) = batches
                .iter_mut()
                .find(|b| b.id == batch_id && b.tx_hash.is_none())
            {
                batch.merkle_root_ultimate = Some(merkle_root_ultimate.to_string());
                batch.merkle_proof_ultimate = Some(proof.to_vec());
            }
        }
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs
            .iter_mut()
            .filter(|j| j.batch_id == batch_id && j.status == JobStatus::Generated)
        {
            job.merkle_proof_ultimate = Some(proof.to_vec());
        }
        Ok(())
    }

    async fn set_batch_anchored(
        &self,
        batch_id: BatchId,
        tx_hash: &str,
        network: &str,
    ) -> Result<()> {
        let mut batches = self.batches.lock().unwrap();
        if let Some(batch) = batches
            .iter_mut()
            .find(|b| b.id == batch_id && b.tx_hash.is_none())
        {
            batch.tx_hash = Some(tx_hash.to_string());
            batch.network = Some(network.to_string());
        }
        Ok(())
    }

    async fn set_job_bundle(&self, job_id: JobId, bundle: &Value) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.verification_bundle = Some(bundle.clone());
        }
        Ok(())
    }

    async fn clear_augmented_paths(&self, batch_id: BatchId) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.iter_mut().filter(|j| j.batch_id == batch_id) {
            job.certificate_with_qr_path = None;
            job.qr_code_path = None;
        }
        Ok(())
    }

    async fn set_job_qr(&self, job_id: JobId, path: &str, fragment: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Generated)
        {
            job.qr_code_path = Some(path.to_string());
            job.qr_payload_fragment = Some(fragment.to_string());
        }
        Ok(())
    }

    async fn set_job_augmented(&self, job_id: JobId, path: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Generated)
        {
            job.certificate_with_qr_path = Some(path.to_string());
        }
        Ok(())
    }

    async fn complete_batch_if_done(&self, batch_id: BatchId) -> Result<bool> {
        let jobs = self.jobs.lock().unwrap();
        let all_done = jobs
            .iter()
            .filter(|j| j.batch_id == batch_id)
            .all(|j| j.status == JobStatus::Generated && j.certificate_with_qr_path.is_some());
        drop(jobs);

        let mut batches = self.batches.lock().unwrap();
        if let Some(batch) = batches.iter_mut().find(|b| {
            b.id == batch_id && b.tx_hash.is_some() && b.status != BatchStatus::Completed
        }) {
            if all_done {
                batch.status = BatchStatus::Completed;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn apply_hashed(job: &mut Job, hashed: &HashedJob) {
    job.certificate_path = Some(hashed.certificate_path.clone());
    job.document_hash = Some(hashed.document_hash.clone());
    job.data_hash = hashed.data_hash.clone();
    job.document_fingerprint = Some(hashed.document_fingerprint.clone());
    job.fingerprint_hash = Some(hashed.fingerprint_hash.clone());
}

// ---------------------------------------------------------------------------
// In-memory storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl StorageGateway for MemStorage {
    async fn store(
        &self,
        bytes: &[u8],
        tenant: TenantId,
        batch: BatchId,
        object: &str,
        opts: &StoreOptions,
    ) -> Result<String> {
        let key = object_key(tenant, batch, object, opts);
        self.objects
            .lock()
            .unwrap()
            .insert(key.clone(), bytes.to_vec());
        Ok(key)
    }

    async fn retrieve(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| IssuerError::Storage(format!("object {path} not found")))
    }

    fn public_url(&self, _path: &str) -> Option<String> {
        None
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Stubbed chain
// ---------------------------------------------------------------------------

/// In-memory anchor: every submission gets a deterministic tx hash and the
/// recorded event root can be tampered for negative tests.
pub struct StubAnchor {
    sequence: AtomicU64,
    anchored: Mutex<HashMap<String, Hash256>>,
    /// When set, recorded event roots have one bit flipped.
    pub corrupt_events: bool,
}

impl StubAnchor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sequence: AtomicU64::new(1),
            anchored: Mutex::new(HashMap::new()),
            corrupt_events: false,
        })
    }

    pub fn corrupting() -> Arc<Self> {
        Arc::new(Self {
            sequence: AtomicU64::new(1),
            anchored: Mutex::new(HashMap::new()),
            corrupt_events: true,
        })
    }

    pub fn anchored_count(&self) -> usize {
        self.anchored.lock().unwrap().len()
    }
}

#[async_trait]
impl AnchorClient for StubAnchor {
    async fn anchor(&self, root: &Hash256, _time_window: u64) -> Result<AnchorReceipt> {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let tx_hash = format!("0x{n:064x}");

        let mut recorded = *root;
        if self.corrupt_events {
            recorded[0] ^= 0x01;
        }
        self.anchored.lock().unwrap().insert(tx_hash.clone(), recorded);

        Ok(AnchorReceipt {
            tx_hash,
            network: "testnet".to_string(),
            block_number: Some(n),
            root_from_event: Some(hex::encode(recorded)),
        })
    }

    async fn verify_transaction(
        &self,
        tx_hash: &str,
        expected_root: Option<&Hash256>,
    ) -> Result<AnchorVerification> {
        let anchored = self.anchored.lock().unwrap();
        let recorded = anchored.get(tx_hash).copied();

        let mru_from_event = recorded.map(hex::encode);
        let mru_matches = expected_root.map(|expected| recorded == Some(*expected));
        let verified = recorded.is_some() && mru_matches.unwrap_or(true);

        Ok(AnchorVerification {
            verified,
            block_number: recorded.map(|_| 1),
            mru_from_event,
            mru_matches,
            explorer_url: None,
        })
    }

    fn network(&self) -> &str {
        "testnet"
    }
}
