// src/audit/mod.rs — Append-only audit trail

pub mod schema;
pub mod store;

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::cost::CostLedgerEntry;
use crate::core::types::{ExtractionAttempt, ExtractionResult};

pub use store::SqliteAuditTrail;

/// Everything that happened to one document in one `process` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub document_hash: String,
    pub session_id: String,
    /// Every attempt in tier order, skipped tiers included.
    pub attempts: Vec<ExtractionAttempt>,
    pub result: ExtractionResult,
    /// Ledger entries charged for this document.
    pub ledger_entries: Vec<CostLedgerEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Id of the previous record for the same document, if any.
    /// Filled in by the trail on append.
    pub supersedes: Option<String>,
}

impl AuditRecord {
    pub fn new(
        session_id: &str,
        result: ExtractionResult,
        ledger_entries: Vec<CostLedgerEntry>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_hash: result.document_hash.clone(),
            session_id: session_id.to_string(),
            attempts: result.escalation_path.clone(),
            result,
            ledger_entries,
            started_at,
            finished_at: Utc::now(),
            supersedes: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("audit record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit record {id} already exists")]
    Duplicate { id: String },

    #[error("audit migration {version} failed: {message}")]
    Migration { version: u32, message: String },
}

/// Append-only store of audit records. There is no update
/// or delete; a correction is a new record whose `supersedes` points at
/// the one it replaces.
pub trait AuditTrail: Send + Sync {
    /// Store `record`, linking it to the latest record for the same
    /// document. Returns the record as stored.
    fn append(&self, record: AuditRecord) -> Result<AuditRecord, AuditError>;

    /// Latest record for a document.
    fn get(&self, document_hash: &str) -> Result<Option<AuditRecord>, AuditError>;

    /// Every record for a document, oldest first.
    fn history(&self, document_hash: &str) -> Result<Vec<AuditRecord>, AuditError>;
}

/// In-process trail, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryAuditTrail {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record, in append order.
    pub fn all(&self) -> Vec<AuditRecord> {
        self.records
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl AuditTrail for MemoryAuditTrail {
    fn append(&self, mut record: AuditRecord) -> Result<AuditRecord, AuditError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.iter().any(|r| r.id == record.id) {
            return Err(AuditError::Duplicate { id: record.id });
        }
        record.supersedes = records
            .iter()
            .rev()
            .find(|r| r.document_hash == record.document_hash)
            .map(|r| r.id.clone());
        records.push(record.clone());
        Ok(record)
    }

    fn get(&self, document_hash: &str) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .rev()
            .find(|r| r.document_hash == document_hash)
            .cloned())
    }

    fn history(&self, document_hash: &str) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| r.document_hash == document_hash)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::types::{AttemptError, Status, Tier};

    pub(crate) fn sample_record(hash: &str) -> AuditRecord {
        let attempt = ExtractionAttempt::failed(
            Tier::Ocr,
            AttemptError::TierUnavailable {
                reason: "tesseract missing".into(),
            },
            0.0,
            0,
            0,
        );
        let result = ExtractionResult::new(hash, vec![attempt], None, Vec::new(), Status::NoTierAvailable);
        AuditRecord::new("session-1", result, Vec::new(), Utc::now())
    }

    #[test]
    fn test_record_mirrors_result() {
        let r = sample_record("abc");
        assert_eq!(r.document_hash, "abc");
        assert_eq!(r.attempts, r.result.escalation_path);
        assert!(r.finished_at >= r.started_at);
        assert!(r.supersedes.is_none());
    }

    #[test]
    fn test_memory_trail_get_missing() {
        let trail = MemoryAuditTrail::new();
        assert!(trail.get("nope").unwrap().is_none());
        assert!(trail.history("nope").unwrap().is_empty());
        assert!(trail.is_empty());
    }

    #[test]
    fn test_memory_trail_supersedes_chain() {
        let trail = MemoryAuditTrail::new();
        let first = trail.append(sample_record("abc")).unwrap();
        trail.append(sample_record("other")).unwrap();
        let second = trail.append(sample_record("abc")).unwrap();

        assert!(first.supersedes.is_none());
        assert_eq!(second.supersedes.as_deref(), Some(first.id.as_str()));
        assert_eq!(trail.get("abc").unwrap().unwrap().id, second.id);
        let history = trail.history("abc").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert_eq!(trail.len(), 3);
    }

    #[test]
    fn test_memory_trail_rejects_duplicate_id() {
        let trail = MemoryAuditTrail::new();
        let record = sample_record("abc");
        trail.append(record.clone()).unwrap();
        assert!(matches!(
            trail.append(record),
            Err(AuditError::Duplicate { .. })
        ));
    }
}
