//! Database schema bootstrap
//!
//! Idempotent DDL executed at startup. The status columns drive every
//! scheduler queue, so each queue's filter has a matching partial index.

use sqlx::postgres::PgPool;

use crate::error::Result;

pub async fn run(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            issuer_public_key TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            parameters JSONB NOT NULL DEFAULT '[]'::jsonb,
            qr_placement JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id UUID PRIMARY KEY,
            tenant_id UUID NOT NULL REFERENCES tenants(id),
            template_id UUID NOT NULL REFERENCES templates(id),
            status TEXT NOT NULL DEFAULT 'pending',
            expiry_date TIMESTAMPTZ,
            invalidation_expiry TIMESTAMPTZ,
            issuer_public_key TEXT,
            signing_key TEXT,
            merkle_root TEXT,
            merkle_root_ultimate TEXT,
            merkle_proof_ultimate JSONB,
            tx_hash TEXT,
            network TEXT,
            signing_status TEXT NOT NULL DEFAULT 'pending_signing',
            finalized_at TIMESTAMPTZ,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            batch_id UUID NOT NULL REFERENCES batches(id),
            data JSONB NOT NULL DEFAULT '{}'::jsonb,
            status TEXT NOT NULL DEFAULT 'pending',
            certificate_path TEXT,
            qr_code_path TEXT,
            certificate_with_qr_path TEXT,
            document_hash TEXT,
            data_hash TEXT,
            document_fingerprint TEXT,
            fingerprint_hash TEXT,
            issuer_signature TEXT,
            merkle_leaf TEXT,
            merkle_proof_intermediate JSONB,
            merkle_proof_ultimate JSONB,
            verification_bundle JSONB,
            qr_payload_fragment TEXT,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs (created_at) WHERE status = 'pending'",
        "CREATE INDEX IF NOT EXISTS idx_jobs_batch ON jobs (batch_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_awaiting_qr ON jobs (created_at) WHERE status = 'generated' AND qr_code_path IS NULL",
        "CREATE INDEX IF NOT EXISTS idx_jobs_awaiting_augment ON jobs (created_at) WHERE status = 'generated' AND certificate_with_qr_path IS NULL",
        "CREATE INDEX IF NOT EXISTS idx_batches_awaiting_mri ON batches (created_at) WHERE merkle_root IS NULL",
        "CREATE INDEX IF NOT EXISTS idx_batches_awaiting_mru ON batches (finalized_at) WHERE tx_hash IS NULL",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
