//! PostgreSQL state store
//!
//! Every transition is a conditional UPDATE guarded by the expected current
//! status, so a stale worker's write affects zero rows instead of clobbering
//! newer state. `claim_pending` uses `FOR UPDATE SKIP LOCKED` so concurrent
//! workers partition the queue instead of double-claiming.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::domain::{
    Batch, BatchId, BatchStatus, HashedJob, Job, JobId, JobStatus, QrPlacement, SignedJob,
    SigningStatus, Template, TemplateId, Tenant, TenantId,
};
use crate::error::{IssuerError, Result};
use crate::infra::StateStore;
use crate::migrations;

pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run idempotent schema bootstrap.
    pub async fn bootstrap(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }
}

const JOB_COLUMNS: &str = "id, batch_id, data, status, certificate_path, qr_code_path, \
     certificate_with_qr_path, document_hash, data_hash, document_fingerprint, \
     fingerprint_hash, issuer_signature, merkle_leaf, merkle_proof_intermediate, \
     merkle_proof_ultimate, verification_bundle, qr_payload_fragment, error_message, created_at";

const BATCH_COLUMNS: &str = "id, tenant_id, template_id, status, expiry_date, \
     invalidation_expiry, issuer_public_key, signing_key, merkle_root, \
     merkle_root_ultimate, merkle_proof_ultimate, tx_hash, network, signing_status, \
     finalized_at, error_message, created_at";

#[async_trait]
impl StateStore for PgStateStore {
    async fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query("INSERT INTO tenants (id, name, issuer_public_key) VALUES ($1, $2, $3)")
            .bind(tenant.id.0)
            .bind(&tenant.name)
            .bind(&tenant.issuer_public_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_template(&self, template: &Template) -> Result<()> {
        sqlx::query(
            "INSERT INTO templates (id, tenant_id, name, content, parameters, qr_placement) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(template.id.0)
        .bind(template.tenant_id.0)
        .bind(&template.name)
        .bind(&template.content)
        .bind(serde_json::to_value(&template.parameters)?)
        .bind(
            template
                .qr_placement
                .map(serde_json::to_value)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_batch(&self, batch: &Batch) -> Result<()> {
        sqlx::query(
            "INSERT INTO batches (id, tenant_id, template_id, status, expiry_date, \
             invalidation_expiry, issuer_public_key, signing_key, signing_status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(batch.id.0)
        .bind(batch.tenant_id.0)
        .bind(batch.template_id.0)
        .bind(batch.status.as_str())
        .bind(batch.expiry_date)
        .bind(batch.invalidation_expiry)
        .bind(&batch.issuer_public_key)
        .bind(&batch.signing_key)
        .bind(batch.signing_status.as_str())
        .bind(batch.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, batch_id, data, status, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(job.id.0)
        .bind(job.batch_id.0)
        .bind(&job.data)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> =
            sqlx::query_as("SELECT id, name, issuer_public_key FROM tenants WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Tenant::from))
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT id, tenant_id, name, content, parameters, qr_placement \
             FROM templates WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Template::try_from).transpose()
    }

    async fn get_batch(&self, id: BatchId) -> Result<Option<Batch>> {
        let row: Option<BatchRow> =
            sqlx::query_as(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Batch::try_from).transpose()
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Job::try_from).transpose()
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'processing', updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM jobs WHERE status = 'pending' \
                 ORDER BY created_at ASC LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_pending_signature(&self, batch_id: BatchId) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE batch_id = $1 AND status = 'pending_signing' \
             ORDER BY created_at ASC"
        ))
        .bind(batch_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_signed_jobs(&self, batch_id: BatchId) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE batch_id = $1 AND status = 'generated' \
             ORDER BY created_at ASC"
        ))
        .bind(batch_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_batches_awaiting_mri(&self) -> Result<Vec<Batch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches b \
             WHERE b.merkle_root IS NULL \
               AND EXISTS ( \
                   SELECT 1 FROM jobs j WHERE j.batch_id = b.id AND j.status = 'generated') \
               AND NOT EXISTS ( \
                   SELECT 1 FROM jobs j WHERE j.batch_id = b.id \
                     AND j.status IN ('pending', 'processing', 'pending_signing')) \
             ORDER BY b.created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Batch::try_from).collect()
    }

    async fn find_batches_awaiting_mru(&self, limit: usize) -> Result<Vec<Batch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE signing_status = 'finalized' \
               AND (merkle_root_ultimate IS NULL OR tx_hash IS NULL) \
             ORDER BY finalized_at ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Batch::try_from).collect()
    }

    async fn find_jobs_awaiting_qr(&self, limit: usize) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {cols} FROM jobs j \
             JOIN batches b ON b.id = j.batch_id \
             WHERE j.status = 'generated' AND j.qr_code_path IS NULL \
               AND b.merkle_root_ultimate IS NOT NULL AND b.tx_hash IS NOT NULL \
             ORDER BY j.created_at ASC LIMIT $1",
            cols = JOB_COLUMNS
                .split(", ")
                .map(|c| format!("j.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_jobs_awaiting_pdf_augment(&self, limit: usize) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = 'generated' AND qr_code_path IS NOT NULL \
               AND certificate_with_qr_path IS NULL AND certificate_path IS NOT NULL \
             ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn mark_pending_signing(&self, job_id: JobId, hashed: &HashedJob) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending_signing', certificate_path = $2, \
             document_hash = $3, data_hash = $4, document_fingerprint = $5, \
             fingerprint_hash = $6, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id.0)
        .bind(&hashed.certificate_path)
        .bind(&hashed.document_hash)
        .bind(&hashed.data_hash)
        .bind(&hashed.document_fingerprint)
        .bind(&hashed.fingerprint_hash)
        .execute(&self.pool)
        .await?;

        guard_one(result.rows_affected(), job_id, "processing", "pending_signing")
    }

    async fn mark_generated(
        &self,
        job_id: JobId,
        hashed: &HashedJob,
        signed: &SignedJob,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'generated', certificate_path = $2, \
             document_hash = $3, data_hash = $4, document_fingerprint = $5, \
             fingerprint_hash = $6, issuer_signature = $7, merkle_leaf = $8, \
             updated_at = NOW() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id.0)
        .bind(&hashed.certificate_path)
        .bind(&hashed.document_hash)
        .bind(&hashed.data_hash)
        .bind(&hashed.document_fingerprint)
        .bind(&hashed.fingerprint_hash)
        .bind(&signed.issuer_signature)
        .bind(&signed.merkle_leaf)
        .execute(&self.pool)
        .await?;

        guard_one(result.rows_affected(), job_id, "processing", "generated")
    }

    async fn record_signature(&self, job_id: JobId, signed: &SignedJob) -> Result<Job> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'generated', issuer_signature = $2, \
             merkle_leaf = $3, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending_signing' \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id.0)
        .bind(&signed.issuer_signature)
        .bind(&signed.merkle_leaf)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(IssuerError::State {
                entity: format!("job {job_id}"),
                from: "pending_signing".to_string(),
                to: "generated".to_string(),
            }),
        }
    }

    async fn mark_job_failed(&self, job_id: JobId, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id.0)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_batch_issuer_key(&self, batch_id: BatchId, public_key: &str) -> Result<()> {
        sqlx::query(
            "UPDATE batches SET issuer_public_key = $2, updated_at = NOW() \
             WHERE id = $1 AND issuer_public_key IS NULL",
        )
        .bind(batch_id.0)
        .bind(public_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_batch_intermediate(
        &self,
        batch_id: BatchId,
        merkle_root: &str,
        proofs: &[(JobId, Vec<String>)],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The root is immutable; losing the race is a clean no-op.
        let updated = sqlx::query(
            "UPDATE batches SET merkle_root = $2, signing_status = 'finalized', \
             finalized_at = NOW(), status = 'processing', updated_at = NOW() \
             WHERE id = $1 AND merkle_root IS NULL",
        )
        .bind(batch_id.0)
        .bind(merkle_root)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (job_id, proof) in proofs {
            sqlx::query(
                "UPDATE jobs SET merkle_proof_intermediate = $2, updated_at = NOW() \
                 WHERE id = $1 AND status = 'generated'",
            )
            .bind(job_id.0)
            .bind(serde_json::to_value(proof)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn set_batch_ultimate(
        &self,
        batch_id: BatchId,
        merkle_root_ultimate: &str,
        proof: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let proof_json = serde_json::to_value(proof)?;

        sqlx::query(
            "UPDATE batches SET merkle_root_ultimate = $2, merkle_proof_ultimate = $3, \
             updated_at = NOW() \
             WHERE id = $1 AND tx_hash IS NULL",
        )
        .bind(batch_id.0)
        .bind(merkle_root_ultimate)
        .bind(&proof_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE jobs SET merkle_proof_ultimate = $2, updated_at = NOW() \
             WHERE batch_id = $1 AND status = 'generated'",
        )
        .bind(batch_id.0)
        .bind(&proof_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_batch_anchored(
        &self,
        batch_id: BatchId,
        tx_hash: &str,
        network: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE batches SET tx_hash = $2, network = $3, updated_at = NOW() \
             WHERE id = $1 AND tx_hash IS NULL",
        )
        .bind(batch_id.0)
        .bind(tx_hash)
        .bind(network)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_bundle(&self, job_id: JobId, bundle: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET verification_bundle = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id.0)
        .bind(bundle)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_augmented_paths(&self, batch_id: BatchId) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET certificate_with_qr_path = NULL, qr_code_path = NULL, \
             updated_at = NOW() WHERE batch_id = $1",
        )
        .bind(batch_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_qr(&self, job_id: JobId, path: &str, fragment: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET qr_code_path = $2, qr_payload_fragment = $3, updated_at = NOW() \
             WHERE id = $1 AND status = 'generated'",
        )
        .bind(job_id.0)
        .bind(path)
        .bind(fragment)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_augmented(&self, job_id: JobId, path: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET certificate_with_qr_path = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'generated'",
        )
        .bind(job_id.0)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_batch_if_done(&self, batch_id: BatchId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE batches SET status = 'completed', updated_at = NOW() \
             WHERE id = $1 AND tx_hash IS NOT NULL AND status <> 'completed' \
               AND NOT EXISTS ( \
                   SELECT 1 FROM jobs j WHERE j.batch_id = $1 \
                     AND (j.status <> 'generated' OR j.certificate_with_qr_path IS NULL))",
        )
        .bind(batch_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn guard_one(rows: u64, job_id: JobId, from: &str, to: &str) -> Result<()> {
    if rows == 1 {
        Ok(())
    } else {
        Err(IssuerError::State {
            entity: format!("job {job_id}"),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    issuer_public_key: Option<String>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: TenantId::from_uuid(row.id),
            name: row.name,
            issuer_public_key: row.issuer_public_key,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    content: String,
    parameters: Value,
    qr_placement: Option<Value>,
}

impl TryFrom<TemplateRow> for Template {
    type Error = IssuerError;

    fn try_from(row: TemplateRow) -> Result<Self> {
        let parameters: Vec<String> = serde_json::from_value(row.parameters)?;
        let qr_placement: Option<QrPlacement> = row
            .qr_placement
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Template {
            id: TemplateId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            name: row.name,
            content: row.content,
            parameters,
            qr_placement,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    tenant_id: Uuid,
    template_id: Uuid,
    status: String,
    expiry_date: Option<DateTime<Utc>>,
    invalidation_expiry: Option<DateTime<Utc>>,
    issuer_public_key: Option<String>,
    signing_key: Option<String>,
    merkle_root: Option<String>,
    merkle_root_ultimate: Option<String>,
    merkle_proof_ultimate: Option<Value>,
    tx_hash: Option<String>,
    network: Option<String>,
    signing_status: String,
    finalized_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = IssuerError;

    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(Batch {
            id: BatchId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            template_id: TemplateId::from_uuid(row.template_id),
            status: BatchStatus::parse(&row.status).ok_or_else(|| {
                IssuerError::Validation(format!("unknown batch status {:?}", row.status))
            })?,
            expiry_date: row.expiry_date,
            invalidation_expiry: row.invalidation_expiry,
            issuer_public_key: row.issuer_public_key,
            signing_key: row.signing_key,
            merkle_root: row.merkle_root,
            merkle_root_ultimate: row.merkle_root_ultimate,
            merkle_proof_ultimate: row
                .merkle_proof_ultimate
                .map(serde_json::from_value)
                .transpose()?,
            tx_hash: row.tx_hash,
            network: row.network,
            signing_status: SigningStatus::parse(&row.signing_status).ok_or_else(|| {
                IssuerError::Validation(format!("unknown signing status {:?}", row.signing_status))
            })?,
            finalized_at: row.finalized_at,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    batch_id: Uuid,
    data: Value,
    status: String,
    certificate_path: Option<String>,
    qr_code_path: Option<String>,
    certificate_with_qr_path: Option<String>,
    document_hash: Option<String>,
    data_hash: Option<String>,
    document_fingerprint: Option<String>,
    fingerprint_hash: Option<String>,
    issuer_signature: Option<String>,
    merkle_leaf: Option<String>,
    merkle_proof_intermediate: Option<Value>,
    merkle_proof_ultimate: Option<Value>,
    verification_bundle: Option<Value>,
    qr_payload_fragment: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = IssuerError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: JobId::from_uuid(row.id),
            batch_id: BatchId::from_uuid(row.batch_id),
            data: row.data,
            status: JobStatus::parse(&row.status).ok_or_else(|| {
                IssuerError::Validation(format!("unknown job status {:?}", row.status))
            })?,
            certificate_path: row.certificate_path,
            qr_code_path: row.qr_code_path,
            certificate_with_qr_path: row.certificate_with_qr_path,
            document_hash: row.document_hash,
            data_hash: row.data_hash,
            document_fingerprint: row.document_fingerprint,
            fingerprint_hash: row.fingerprint_hash,
            issuer_signature: row.issuer_signature,
            merkle_leaf: row.merkle_leaf,
            merkle_proof_intermediate: row
                .merkle_proof_intermediate
                .map(serde_json::from_value)
                .transpose()?,
            merkle_proof_ultimate: row
                .merkle_proof_ultimate
                .map(serde_json::from_value)
                .transpose()?,
            verification_bundle: row.verification_bundle,
            qr_payload_fragment: row.qr_payload_fragment,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}
