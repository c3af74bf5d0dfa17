//! In-memory, hash-chained audit sink
//!
//! Keeps the most recent events in a bounded ring. Every record stores the
//! SHA-256 of its own content chained to the previous record's hash, so any
//! edit to a retained record is detectable with [`MemoryAuditSink::verify_chain`].

use crate::sink::{AuditSink, SinkResult};
use async_trait::async_trait;
use carebridge_core::AuditEvent;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 1000;

/// A retained audit event with its chain metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    fn compute_hash(id: &str, event: &AuditEvent, previous_hash: Option<&str>) -> SinkResult<String> {
        let mut hasher = Sha256::new();
        if let Some(previous) = previous_hash {
            hasher.update(previous.as_bytes());
        }
        hasher.update(id.as_bytes());
        hasher.update(serde_json::to_vec(event)?);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Result of a chain verification pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub total_records: usize,
    /// Index of the first record whose hash or link does not match
    pub broken_at: Option<usize>,
}

/// Bounded in-memory sink
pub struct MemoryAuditSink {
    records: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// The newest `limit` records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = records.len().saturating_sub(limit);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute every retained hash and check each link to its predecessor
    pub fn verify_chain(&self) -> ChainVerification {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let total_records = records.len();

        let mut previous: Option<&AuditRecord> = None;
        for (index, record) in records.iter().enumerate() {
            let link_ok = match previous {
                // The oldest retained record may point at an evicted one
                None => true,
                Some(prev) => record.previous_hash.as_deref() == Some(prev.hash.as_str()),
            };
            let hash_ok = AuditRecord::compute_hash(
                &record.id,
                &record.event,
                record.previous_hash.as_deref(),
            )
            .map(|hash| hash == record.hash)
            .unwrap_or(false);

            if !link_ok || !hash_ok {
                return ChainVerification {
                    is_valid: false,
                    total_records,
                    broken_at: Some(index),
                };
            }
            previous = Some(record);
        }

        ChainVerification {
            is_valid: true,
            total_records,
            broken_at: None,
        }
    }

    #[cfg(test)]
    fn tamper(&self, index: usize, action: &str) {
        let mut records = self.records.lock().unwrap();
        records[index].event.action = action.to_string();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write_event(&self, event: &AuditEvent) -> SinkResult<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        let id = Uuid::new_v4().to_string();
        let previous_hash = records.back().map(|r| r.hash.clone());
        let hash = AuditRecord::compute_hash(&id, event, previous_hash.as_deref())?;

        records.push_back(AuditRecord {
            id,
            hash,
            previous_hash,
            event: event.clone(),
        });
        while records.len() > self.capacity {
            records.pop_front();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
