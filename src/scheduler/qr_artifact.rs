//! P5: QR artifact generation
//!
//! For anchored jobs, builds the v2 payload, persists the compressed
//! fragment, and renders the standalone PNG artifact.

use tracing::{debug, warn};

use crate::error::Result;
use crate::infra::StoreOptions;
use crate::qr::render_with_fallbacks;

use super::{load_aggregate, qr_content_for, IssuerContext, JobAggregate};

pub(crate) async fn tick(ctx: &IssuerContext, limit: usize) -> Result<()> {
    let jobs = ctx.store.find_jobs_awaiting_qr(limit).await?;

    for job in jobs {
        let job_id = job.id;
        let result = async {
            let aggregate = load_aggregate(ctx, job).await?;
            process(ctx, &aggregate).await
        }
        .await;

        if let Err(e) = result {
            // Transient: retried next tick.
            warn!(job = %job_id, error = %e, "qr artifact generation failed");
        }
    }
    Ok(())
}

async fn process(ctx: &IssuerContext, aggregate: &JobAggregate) -> Result<()> {
    let (_, fragment, content, fallbacks) = qr_content_for(aggregate, &ctx.config)?;

    let (png, used) = render_with_fallbacks(&content, &fallbacks, &ctx.config.qr_artifact)?;
    if used > 0 {
        warn!(
            job = %aggregate.job.id,
            fallback = used,
            "qr payload overflowed; using fallback content"
        );
    }

    let path = ctx
        .storage
        .store(
            &png,
            aggregate.batch.tenant_id,
            aggregate.batch.id,
            &aggregate.job.id.to_string(),
            &StoreOptions::png("qr-codes"),
        )
        .await?;

    ctx.store.set_job_qr(aggregate.job.id, &path, &fragment).await?;
    debug!(job = %aggregate.job.id, path = %path, "qr artifact stored");
    Ok(())
}
