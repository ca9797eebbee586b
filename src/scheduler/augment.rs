//! P6: PDF augmentation
//!
//! Embeds the original PDF and the verification bundle, draws the QR image
//! at the template's placement, and completes the batch once every job
//! carries an augmented PDF and the batch is anchored.

use tracing::{debug, info, warn};

use crate::domain::VerificationBundle;
use crate::error::{IssuerError, Result};
use crate::infra::StoreOptions;
use crate::pdf::augment::{augment_pdf, AugmentRequest};
use crate::qr::render_with_fallbacks;

use super::{load_aggregate, qr_content_for, IssuerContext, JobAggregate};

pub(crate) async fn tick(ctx: &IssuerContext, limit: usize) -> Result<()> {
    let jobs = ctx.store.find_jobs_awaiting_pdf_augment(limit).await?;

    for job in jobs {
        let job_id = job.id;
        let result = async {
            let aggregate = load_aggregate(ctx, job).await?;
            process(ctx, &aggregate).await
        }
        .await;

        if let Err(e) = result {
            // Transient: retried next tick.
            warn!(job = %job_id, error = %e, "pdf augmentation failed");
        }
    }
    Ok(())
}

async fn process(ctx: &IssuerContext, aggregate: &JobAggregate) -> Result<()> {
    let certificate_path = aggregate.job.certificate_path.as_deref().ok_or_else(|| {
        IssuerError::State {
            entity: format!("job {}", aggregate.job.id),
            from: "generated without certificate".to_string(),
            to: "augmented".to_string(),
        }
    })?;
    let original_pdf = ctx.storage.retrieve(certificate_path).await?;

    // Prefer the bundle P4 regenerated; rebuild only when it is missing.
    let bundle_json = match &aggregate.job.verification_bundle {
        Some(value) => serde_json::to_vec(value)?,
        None => {
            VerificationBundle::build(&aggregate.job, &aggregate.batch, &aggregate.tenant)?
                .to_json_bytes()
        }
    };

    let (_, _, content, fallbacks) = qr_content_for(aggregate, &ctx.config)?;
    let (qr_png, _) = render_with_fallbacks(&content, &fallbacks, &ctx.config.qr_pdf)?;

    let augmented = augment_pdf(&AugmentRequest {
        original_pdf: &original_pdf,
        bundle_json: &bundle_json,
        qr_png: &qr_png,
        placement: aggregate.template.effective_placement(),
        issuer_name: &ctx.config.issuer_name,
    })?;

    let path = ctx
        .storage
        .store(
            &augmented,
            aggregate.batch.tenant_id,
            aggregate.batch.id,
            &format!("{}-with-qr", aggregate.job.id),
            &StoreOptions::pdf_in("qr-embedded-certificates"),
        )
        .await?;

    ctx.store.set_job_augmented(aggregate.job.id, &path).await?;
    debug!(job = %aggregate.job.id, path = %path, "augmented pdf stored");

    if ctx.store.complete_batch_if_done(aggregate.batch.id).await? {
        info!(batch = %aggregate.batch.id, "batch completed");
    }
    Ok(())
}
