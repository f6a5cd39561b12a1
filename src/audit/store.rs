// src/audit/store.rs — SQLite-backed audit trail

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::schema;
use super::{AuditError, AuditRecord, AuditTrail};
use crate::core::cost::TierCostEntry;
use crate::core::types::Tier;

/// Audit trail persisted to SQLite. Records are stored whole as JSON;
/// the ledger entries they carry are also written to `ledger_entries`
/// so cumulative spend survives restarts.
pub struct SqliteAuditTrail {
    conn: Mutex<Connection>,
}

impl SqliteAuditTrail {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Total spend across every session recorded in this database.
    pub fn cumulative_cost(&self) -> Result<f64, AuditError> {
        Ok(self.conn().query_row(
            "SELECT COALESCE(SUM(cost), 0.0) FROM ledger_entries",
            [],
            |r| r.get(0),
        )?)
    }

    pub fn cost_by_tier(&self) -> Result<Vec<TierCostEntry>, AuditError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT tier, SUM(cost),
                    SUM(CASE WHEN source = 'skipped' THEN 0 ELSE 1 END),
                    SUM(CASE WHEN source = 'skipped' THEN 1 ELSE 0 END)
             FROM ledger_entries GROUP BY tier",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (tier, cost, invocations, skipped) = row?;
            match tier.parse::<Tier>() {
                Ok(tier) => entries.push(TierCostEntry {
                    tier,
                    cost,
                    invocations: invocations.max(0) as u64,
                    skipped: skipped.max(0) as u64,
                }),
                Err(e) => tracing::warn!("Ignoring ledger rows: {}", e),
            }
        }
        entries.sort_by_key(|e| e.tier);
        Ok(entries)
    }

    pub fn record_count(&self) -> Result<u64, AuditError> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM audit_records", [], |r| r.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl AuditTrail for SqliteAuditTrail {
    fn append(&self, mut record: AuditRecord) -> Result<AuditRecord, AuditError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM audit_records WHERE id = ?1)",
            params![record.id],
            |r| r.get(0),
        )?;
        if exists {
            return Err(AuditError::Duplicate { id: record.id });
        }

        record.supersedes = tx
            .query_row(
                "SELECT id FROM audit_records WHERE document_hash = ?1
                 ORDER BY seq DESC LIMIT 1",
                params![record.document_hash],
                |r| r.get(0),
            )
            .optional()?;

        let json = serde_json::to_string(&record)?;
        tx.execute(
            "INSERT INTO audit_records
             (id, document_hash, session_id, status, supersedes, started_at, finished_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.document_hash,
                record.session_id,
                record.result.status.as_str(),
                record.supersedes,
                record.started_at.to_rfc3339(),
                record.finished_at.to_rfc3339(),
                json,
            ],
        )?;

        for entry in &record.ledger_entries {
            tx.execute(
                "INSERT INTO ledger_entries
                 (audit_id, document_hash, tier, cost, source, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    entry.document_hash,
                    entry.tier.as_str(),
                    entry.cost,
                    entry.source.as_str(),
                    entry.timestamp.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(record)
    }

    fn get(&self, document_hash: &str) -> Result<Option<AuditRecord>, AuditError> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT record_json FROM audit_records WHERE document_hash = ?1
                 ORDER BY seq DESC LIMIT 1",
                params![document_hash],
                |r| r.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(AuditError::from))
            .transpose()
    }

    fn history(&self, document_hash: &str) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT record_json FROM audit_records WHERE document_hash = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![document_hash], |r| r.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }
}
