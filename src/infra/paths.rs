// src/infra/paths.rs — XDG-compliant path management
//
// All paths respect the BILLWISE_HOME environment variable for isolation.
// When BILLWISE_HOME is set, config and data live under that directory.
// When unset, config uses ~/.billwise/ and data uses XDG_DATA_HOME/billwise.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the BILLWISE_HOME override, if set.
fn billwise_home() -> Option<PathBuf> {
    std::env::var_os("BILLWISE_HOME").map(PathBuf::from)
}

/// Home directory, or the working directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $BILLWISE_HOME/ or ~/.billwise/
pub fn config_dir() -> PathBuf {
    if let Some(home) = billwise_home() {
        return home;
    }
    dirs_home().join(".billwise")
}

/// Data directory: $BILLWISE_HOME/data/ or ~/.local/share/billwise/
pub fn data_dir() -> PathBuf {
    if let Some(home) = billwise_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "billwise")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Audit trail database
pub fn audit_db_path() -> PathBuf {
    data_dir().join("audit.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure config and data directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(())
}
