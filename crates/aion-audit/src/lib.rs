//! Audit Agent (spec §4.6). Single append-only channel into which every
//! other component writes; records accumulate into HMAC-chained,
//! immutable batches.

pub mod batching;
pub mod verify;

use aion_domain::audit::{Actor, AuditBatch, AuditOutcome, AuditRecord};
use aion_domain::sink::{AuditSink, AuditSinkError};
use aion_repository::AuditBatchRepository;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub use batching::BatchSealTrigger;
pub use verify::{verify_range, VerificationError};

type HmacSha256 = Hmac<Sha256>;

pub struct AuditAgent {
    secret: Vec<u8>,
    batch_size: usize,
    pending: Mutex<Vec<AuditRecord>>,
    last_sealed_tag: Mutex<String>,
    next_batch_index: AtomicU64,
    repository: Arc<dyn AuditBatchRepository>,
}

impl AuditAgent {
    pub fn new(secret: Vec<u8>, batch_size: usize, repository: Arc<dyn AuditBatchRepository>) -> Self {
        Self {
            secret,
            batch_size,
            pending: Mutex::new(Vec::new()),
            last_sealed_tag: Mutex::new(String::new()),
            next_batch_index: AtomicU64::new(0),
            repository,
        }
    }

    fn compute_tag(secret: &[u8], records: &[AuditRecord], previous_digest: &str, index: u64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        let records_bytes = serde_json::to_vec(records).unwrap_or_default();
        mac.update(&records_bytes);
        mac.update(previous_digest.as_bytes());
        mac.update(&index.to_be_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Seals the currently pending records into a batch, regardless of
    /// whether `batch_size` or the wall-clock timeout triggered the call
    /// — both paths funnel through here so the sealing logic has one
    /// implementation.
    pub async fn seal(&self) -> Result<Option<AuditBatch>, AuditSinkError> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(None);
        }
        let records = std::mem::take(&mut *pending);
        drop(pending);

        let batch_index = self.next_batch_index.fetch_add(1, Ordering::SeqCst);
        let mut last_tag = self.last_sealed_tag.lock().await;
        let tag = Self::compute_tag(&self.secret, &records, &last_tag, batch_index);

        let batch = AuditBatch {
            batch_index,
            records,
            previous_digest: last_tag.clone(),
            tag: tag.clone(),
            sealed_at: Utc::now(),
        };

        self.repository
            .create(batch.clone())
            .await
            .map_err(|e| AuditSinkError::Unavailable(e.to_string()))?;

        *last_tag = tag;
        Ok(Some(batch))
    }

    /// Rewrites affected batches with tombstones in place of the subject's
    /// records and re-seals forward from the earliest affected batch,
    /// since every later batch's tag chains through the earlier one's
    /// (spec §4.6). Emits a distinct `erasure` record into the live batch
    /// so this cannot masquerade as ordinary log growth.
    pub async fn erase_subject(&self, predicate: impl Fn(&AuditRecord) -> bool) -> Result<(), AuditSinkError> {
        let latest = self
            .repository
            .latest_index()
            .await
            .map_err(|e| AuditSinkError::Unavailable(e.to_string()))?;
        let Some(latest) = latest else { return Ok(()) };

        let mut batches = self
            .repository
            .list_range(0, latest)
            .await
            .map_err(|e| AuditSinkError::Unavailable(e.to_string()))?;

        let earliest_affected = batches
            .iter()
            .position(|b| b.records.iter().any(&predicate));

        let Some(start) = earliest_affected else { return Ok(()) };

        let mut previous_digest = if start == 0 {
            String::new()
        } else {
            batches[start - 1].tag.clone()
        };

        for batch in batches.iter_mut().skip(start) {
            for record in batch.records.iter_mut() {
                if predicate(record) {
                    record.reasoning = "[tombstoned]".to_string();
                    record.input_payload = serde_json::Value::Null;
                    record.outcome = AuditOutcome::Failed {
                        reason: "erased by compliance request".to_string(),
                    };
                }
            }
            batch.previous_digest = previous_digest.clone();
            batch.tag = Self::compute_tag(&self.secret, &batch.records, &previous_digest, batch.batch_index);
            previous_digest = batch.tag.clone();

            self.repository
                .create(batch.clone())
                .await
                .map_err(|e| AuditSinkError::Unavailable(e.to_string()))?;
        }

        *self.last_sealed_tag.lock().await = previous_digest;

        self.append(AuditRecord {
            id: Uuid::new_v4(),
            index: 0,
            actor: Actor::AuditAgent,
            action: "erase_subject".to_string(),
            reasoning: format!(
                "tombstoned matching records and re-sealed batches {start}..={latest}"
            ),
            input_payload: serde_json::Value::Null,
            outcome: AuditOutcome::Succeeded,
            cost_impact_usd: 0.0,
            duration_ms: 0,
            safety_approved: true,
            goal_id: None,
            timestamp: Utc::now(),
        })
        .await
    }
}

#[async_trait]
impl AuditSink for AuditAgent {
    async fn append(&self, mut record: AuditRecord) -> Result<(), AuditSinkError> {
        let mut pending = self.pending.lock().await;
        record.index = pending.len() as u64;
        pending.push(record);
        let should_seal = pending.len() >= self.batch_size;
        drop(pending);

        if should_seal {
            self.seal().await?;
        }
        Ok(())
    }
}
