// src/infra/errors.rs — Error types for billwise

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BillwiseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tier '{tier}' is not configured")]
    TierNotConfigured { tier: String },

    #[error("Audit record not found for document {hash}")]
    AuditNotFound { hash: String },

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BillwiseError {
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            BillwiseError::Config(_)
                | BillwiseError::ConfigParse(_)
                | BillwiseError::TierNotConfigured { .. }
        )
    }
}
