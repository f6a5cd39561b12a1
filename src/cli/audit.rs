// src/cli/audit.rs — `billwise audit`

use std::path::Path;

use crate::audit::{AuditTrail, SqliteAuditTrail};
use crate::core::types::content_hash;
use crate::infra::errors::BillwiseError;
use crate::infra::paths;

/// Print the latest audit record for a document (or all of them).
pub async fn run_audit(target: &str, history: bool) -> anyhow::Result<()> {
    let hash = resolve_hash(target).await?;
    let db_path = paths::audit_db_path();
    if !db_path.exists() {
        return Err(BillwiseError::AuditNotFound { hash }.into());
    }
    let trail = SqliteAuditTrail::open(&db_path)?;

    if history {
        let records = trail.history(&hash)?;
        if records.is_empty() {
            return Err(BillwiseError::AuditNotFound { hash }.into());
        }
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        let record = trail
            .get(&hash)?
            .ok_or(BillwiseError::AuditNotFound { hash })?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}

/// A path to an existing file is hashed; anything else is taken as a hash.
async fn resolve_hash(target: &str) -> anyhow::Result<String> {
    let path = Path::new(target);
    if path.is_file() {
        let bytes = tokio::fs::read(path).await?;
        return Ok(content_hash(&bytes));
    }
    Ok(target.trim().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_hash_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bill.txt");
        std::fs::write(&file, b"hello").unwrap();
        let hash = resolve_hash(file.to_str().unwrap()).await.unwrap();
        assert_eq!(hash, content_hash(b"hello"));
    }

    #[tokio::test]
    async fn test_resolve_hash_passthrough() {
        assert_eq!(resolve_hash(" ABC123 ").await.unwrap(), "abc123");
    }
}
