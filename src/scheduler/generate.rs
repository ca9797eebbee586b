//! P1: document generation
//!
//! Claims pending jobs, renders (or loads) the PDF, computes the document
//! hash, best-effort content hash, fingerprint, and fingerprint hash, and
//! either parks the job for external signing or signs it immediately with
//! the batch's auto-signing key.

use tracing::{debug, warn};

use crate::crypto::content_hash::content_hash;
use crate::crypto::fingerprint::Fingerprint;
use crate::crypto::hash::{hex_to_bytes, keccak256, to_hex};
use crate::crypto::signing::{public_key_for_private, sign_prehash};
use crate::domain::{HashedJob, Job, SignedJob};
use crate::error::{IssuerError, Result};
use crate::infra::{substitute_params, StoreOptions};
use crate::pdf::text::content_hash_pages;

use super::{IssuanceScheduler, IssuerContext};

pub(crate) async fn tick(scheduler: &IssuanceScheduler) -> Result<()> {
    let jobs = scheduler
        .ctx
        .store
        .claim_pending(scheduler.config.claim_limit)
        .await?;
    if jobs.is_empty() {
        return Ok(());
    }
    debug!(count = jobs.len(), "claimed pending jobs");

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        if !scheduler.claim_in_flight(job.id) {
            // Another worker in this process is already on it.
            continue;
        }

        let ctx = scheduler.ctx.clone();
        let pool = scheduler.render_pool.clone();
        let in_flight = scheduler.in_flight.clone();
        let render_timeout = scheduler.config.render_timeout;

        handles.push(tokio::spawn(async move {
            let job_id = job.id;
            let _permit = pool.acquire().await;
            if let Err(e) = process(&ctx, job, render_timeout).await {
                warn!(job = %job_id, error = %e, "generation failed");
                if let Err(store_err) = ctx.store.mark_job_failed(job_id, &e.to_string()).await {
                    warn!(job = %job_id, error = %store_err, "failed to record job failure");
                }
            }
            in_flight.lock().expect("in-flight lock").remove(&job_id);
        }));
    }

    // The tick owns its iteration: waiting here is what makes shutdown
    // drain and the render bound effective.
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn process(
    ctx: &IssuerContext,
    job: Job,
    render_timeout: std::time::Duration,
) -> Result<()> {
    let batch = ctx
        .store
        .get_batch(job.batch_id)
        .await?
        .ok_or_else(|| IssuerError::Validation(format!("batch {} not found", job.batch_id)))?;

    // Uploaded PDFs skip rendering.
    let (pdf_bytes, certificate_path) = match &job.certificate_path {
        Some(path) => (ctx.storage.retrieve(path).await?, path.clone()),
        None => {
            let template = ctx
                .store
                .get_template(batch.template_id)
                .await?
                .ok_or_else(|| {
                    IssuerError::Validation(format!("template {} not found", batch.template_id))
                })?;
            let html = substitute_params(&template.content, &job.data);
            let bytes = tokio::time::timeout(render_timeout, ctx.renderer.render(&html))
                .await
                .map_err(|_| IssuerError::Pdf("render timed out".to_string()))??;
            let path = ctx
                .storage
                .store(
                    &bytes,
                    batch.tenant_id,
                    batch.id,
                    &job.id.to_string(),
                    &StoreOptions::pdf(),
                )
                .await?;
            (bytes, path)
        }
    };

    let document_hash = keccak256(&pdf_bytes);

    // Content hash is best effort; a PDF without a text layer is fine.
    let data_hash = lopdf::Document::load_mem(&pdf_bytes)
        .ok()
        .map(|doc| to_hex(&content_hash(&content_hash_pages(&doc))));

    let (ed, ei) = batch.expiry_epochs();
    let fingerprint = Fingerprint::new(document_hash, ed, ei);

    let hashed = HashedJob {
        certificate_path,
        document_hash: to_hex(&document_hash),
        data_hash,
        document_fingerprint: fingerprint.to_hex(),
        fingerprint_hash: fingerprint.hash_hex(),
    };

    match &batch.signing_key {
        Some(signing_key) => {
            let signature = sign_prehash(&hashed.fingerprint_hash, signing_key)?;
            let signature_bytes = hex_to_bytes(&signature)
                .ok_or_else(|| IssuerError::Crypto("unhexable signature".to_string()))?;
            let signed = SignedJob {
                merkle_leaf: to_hex(&keccak256(&signature_bytes)),
                issuer_signature: signature,
            };

            if batch.issuer_public_key.is_none() {
                let public_key = public_key_for_private(signing_key)?;
                ctx.store.set_batch_issuer_key(batch.id, &public_key).await?;
            }

            ctx.store.mark_generated(job.id, &hashed, &signed).await?;
            debug!(job = %job.id, "generated and auto-signed");
        }
        None => {
            ctx.store.mark_pending_signing(job.id, &hashed).await?;
            debug!(job = %job.id, "generated, awaiting signature");
        }
    }

    Ok(())
}
