//! P3: intermediate tree finalization
//!
//! Once every job in a batch is signed, the leaves are gathered in creation
//! order (the ordering is load-bearing: proofs are only reproducible against
//! the same leaf sequence), the tree is built, and the root plus per-job
//! proofs land in one guarded write. The root is immutable; losing the race
//! to another worker is a no-op.

use tracing::{info, warn};

use crate::crypto::hash::{hex_to_hash, to_hex, Hash256};
use crate::domain::merkle::MerkleTree;
use crate::domain::JobId;
use crate::error::{IssuerError, Result};

use super::IssuerContext;

pub(crate) async fn tick(ctx: &IssuerContext) -> Result<()> {
    let batches = ctx.store.find_batches_awaiting_mri().await?;

    for batch in batches {
        if let Err(e) = finalize_batch(ctx, batch.id).await {
            // Transient: the next tick retries; writes are guarded on the
            // root's absence.
            warn!(batch = %batch.id, error = %e, "intermediate finalization failed");
        }
    }
    Ok(())
}

async fn finalize_batch(ctx: &IssuerContext, batch_id: crate::domain::BatchId) -> Result<()> {
    let jobs = ctx.store.find_signed_jobs(batch_id).await?;
    if jobs.is_empty() {
        return Ok(());
    }

    let leaves: Vec<Hash256> = jobs
        .iter()
        .map(|job| {
            job.merkle_leaf
                .as_deref()
                .and_then(hex_to_hash)
                .ok_or_else(|| {
                    IssuerError::Merkle(format!("job {} has no usable leaf", job.id))
                })
        })
        .collect::<Result<_>>()?;

    let tree = MerkleTree::build(&leaves)
        .ok_or_else(|| IssuerError::Merkle("batch has no leaves".to_string()))?;
    let merkle_root = to_hex(&tree.root());

    let proofs: Vec<(JobId, Vec<String>)> = jobs
        .iter()
        .enumerate()
        .map(|(index, job)| {
            let proof = tree
                .proof_at(index)
                .ok_or_else(|| IssuerError::Merkle(format!("no proof at index {index}")))?;
            Ok((job.id, proof.iter().map(to_hex).collect()))
        })
        .collect::<Result<_>>()?;

    let applied = ctx
        .store
        .set_batch_intermediate(batch_id, &merkle_root, &proofs)
        .await?;

    if applied {
        info!(
            batch = %batch_id,
            root = %merkle_root,
            leaves = leaves.len(),
            "intermediate root finalized"
        );
    }
    Ok(())
}
