//! Verification of a historical audit range: a linear sweep recomputing
//! HMAC tags, reporting the first divergent index on mismatch (spec §4.6).

use aion_domain::audit::AuditBatch;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("tag mismatch at batch index {0}")]
    Diverged(u64),
    #[error("batch {0} does not chain to the tag of the prior batch")]
    BrokenChain(u64),
}

fn recompute_tag(secret: &[u8], batch: &AuditBatch) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    let records_bytes = serde_json::to_vec(&batch.records).unwrap_or_default();
    mac.update(&records_bytes);
    mac.update(batch.previous_digest.as_bytes());
    mac.update(&batch.batch_index.to_be_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `batches` must be contiguous and sorted by `batch_index`. Returns the
/// index of the first batch whose recomputed tag diverges from the
/// persisted one, or whose `previous_digest` doesn't match the prior
/// batch's tag.
pub fn verify_range(secret: &[u8], batches: &[AuditBatch]) -> Result<(), VerificationError> {
    for (position, batch) in batches.iter().enumerate() {
        if position > 0 {
            let prior_tag = &batches[position - 1].tag;
            if &batch.previous_digest != prior_tag {
                return Err(VerificationError::BrokenChain(batch.batch_index));
            }
        }

        let recomputed = recompute_tag(secret, batch);
        if recomputed != batch.tag {
            return Err(VerificationError::Diverged(batch.batch_index));
        }
    }
    Ok(())
}
