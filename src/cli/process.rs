// src/cli/process.rs — `billwise process`

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::audit::{AuditTrail, SqliteAuditTrail};
use crate::core::batch::BatchProcessor;
use crate::core::cost::CostLedger;
use crate::core::orchestrator::Orchestrator;
use crate::core::output::OutputRecord;
use crate::core::session::ExtractionSession;
use crate::core::types::Document;
use crate::infra::config::Config;
use crate::infra::paths;
use crate::tier::TierRegistry;

/// Process `files` as one batch and print one JSON output record per line.
pub async fn run_process(
    config: &Config,
    files: &[String],
    media_type: Option<&str>,
    pretty: bool,
    report: bool,
) -> anyhow::Result<()> {
    paths::ensure_dirs().await?;
    let trail = Arc::new(SqliteAuditTrail::open(&paths::audit_db_path())?);
    let prior_total = trail.cumulative_cost()?;

    let registry = TierRegistry::from_config(config)?;
    if registry.tiers().is_empty() {
        tracing::warn!("No tier adapters configured; every document will report no_tier_available");
    }

    let ledger = CostLedger::new(config.costs.clone()).with_prior_total(prior_total);
    let session = Arc::new(ExtractionSession::with_ledger(ledger));
    let audit: Arc<dyn AuditTrail> = trail;
    let orchestrator = Arc::new(Orchestrator::new(config, registry, audit));
    let batch = BatchProcessor::new(orchestrator, session.clone(), config.workers.max_concurrency);

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let path = Path::new(file);
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let media = media_type
            .map(str::to_string)
            .unwrap_or_else(|| media_type_for(path).to_string());
        documents.push(Document::new(bytes, &media));
    }

    let results = batch.run(documents).await;
    for result in &results {
        let record = OutputRecord::from_result(result, &config.pipeline.default_region);
        let line = if pretty {
            serde_json::to_string_pretty(&record)?
        } else {
            serde_json::to_string(&record)?
        };
        println!("{line}");
    }

    if report {
        eprint!("{}", session.ledger().analytics_report());
    } else {
        eprintln!("{}", session.ledger().summary());
    }
    Ok(())
}

/// Media type from a file extension; `application/octet-stream` when unknown
/// (which input validation then rejects).
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "txt" | "text" => "text/plain",
        _ => "application/octet-stream",
    }
}
