//! P4: ultimate tree construction and anchoring
//!
//! Finalized batches enter the ultimate tree oldest-first. A lone batch is
//! padded so its proof is never empty. Roots and proofs are written before
//! the chain submission: a failed submission keeps them and leaves the
//! transaction hash null, so the next tick retries ("anchored-later").
//! After a successful anchor the verification bundles are regenerated and
//! augmented PDFs are invalidated so P6 re-embeds fresh proofs.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::crypto::hash::{hex_to_hash, to_hex, Hash256};
use crate::domain::merkle::MerkleTree;
use crate::domain::{Batch, VerificationBundle};
use crate::error::{IssuerError, Result};

use super::IssuerContext;

pub(crate) async fn tick(ctx: &IssuerContext, batch_limit: usize) -> Result<()> {
    let batches = ctx.store.find_batches_awaiting_mru(batch_limit).await?;
    if batches.is_empty() {
        return Ok(());
    }

    let roots: Vec<Hash256> = batches
        .iter()
        .map(|batch| {
            batch
                .merkle_root
                .as_deref()
                .and_then(hex_to_hash)
                .ok_or_else(|| {
                    IssuerError::Merkle(format!(
                        "finalized batch {} has no intermediate root",
                        batch.id
                    ))
                })
        })
        .collect::<Result<_>>()?;

    let (tree, padded) = MerkleTree::build_ultimate(&roots)
        .ok_or_else(|| IssuerError::Merkle("empty ultimate set".to_string()))?;
    let ultimate_root = tree.root();
    let ultimate_root_hex = to_hex(&ultimate_root);

    for (index, batch) in batches.iter().enumerate() {
        let proof = tree
            .proof_at(index)
            .ok_or_else(|| IssuerError::Merkle(format!("no ultimate proof at {index}")))?;
        let proof_hex: Vec<String> = proof.iter().map(to_hex).collect();
        ctx.store
            .set_batch_ultimate(batch.id, &ultimate_root_hex, &proof_hex)
            .await?;
    }

    info!(
        root = %ultimate_root_hex,
        batches = batches.len(),
        padded,
        "ultimate root built"
    );

    let anchor = match &ctx.anchor {
        Some(anchor) => anchor,
        None => {
            debug!("no chain client configured; batches stay anchored-later");
            return Ok(());
        }
    };

    // The submitted window is the oldest finalization in the set.
    let time_window = batches
        .iter()
        .filter_map(|batch| batch.finalized_at)
        .min()
        .unwrap_or_else(Utc::now)
        .timestamp()
        .max(0) as u64;

    let receipt = match anchor.anchor(&ultimate_root, time_window).await {
        Ok(receipt) => receipt,
        Err(e) => {
            // Non-fatal: roots and proofs are kept, tx stays null.
            warn!(error = %e, "anchor submission failed; will retry next tick");
            return Ok(());
        }
    };

    info!(
        tx_hash = %receipt.tx_hash,
        network = %receipt.network,
        block = receipt.block_number.unwrap_or(0),
        "ultimate root anchored"
    );

    for batch in &batches {
        ctx.store
            .set_batch_anchored(batch.id, &receipt.tx_hash, &receipt.network)
            .await?;
        refresh_bundles(ctx, batch).await?;
    }

    Ok(())
}

/// Regenerate the verification bundles of an anchored batch and invalidate
/// its augmented PDFs.
async fn refresh_bundles(ctx: &IssuerContext, stale: &Batch) -> Result<()> {
    let batch = ctx
        .store
        .get_batch(stale.id)
        .await?
        .ok_or_else(|| IssuerError::Validation(format!("batch {} disappeared", stale.id)))?;
    let tenant = ctx
        .store
        .get_tenant(batch.tenant_id)
        .await?
        .ok_or_else(|| IssuerError::Validation(format!("tenant {} not found", batch.tenant_id)))?;

    for job in ctx.store.find_signed_jobs(batch.id).await? {
        match VerificationBundle::build(&job, &batch, &tenant) {
            Ok(bundle) => {
                ctx.store.set_job_bundle(job.id, &bundle.to_value()).await?;
            }
            Err(e) => {
                warn!(job = %job.id, error = %e, "bundle regeneration skipped");
            }
        }
    }

    ctx.store.clear_augmented_paths(batch.id).await?;
    Ok(())
}
