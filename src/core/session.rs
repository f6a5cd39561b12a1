// src/core/session.rs — Per-run extraction session

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::cost::CostLedger;
use super::types::Tier;
use super::validation::SeenUsage;
use crate::infra::config::{Config, CostRates};

/// State shared by every document processed in one run: the cost ledger
/// and the per-tier usage history used for unit plausibility.
#[derive(Debug)]
pub struct ExtractionSession {
    id: String,
    started_at: DateTime<Utc>,
    ledger: CostLedger,
    usage_history: Mutex<HashMap<Tier, SeenUsage>>,
}

impl ExtractionSession {
    pub fn new(rates: CostRates) -> Self {
        Self::with_ledger(CostLedger::new(rates))
    }

    pub fn with_ledger(ledger: CostLedger) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ledger,
            usage_history: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Arc<Self> {
        Arc::new(Self::new(config.costs.clone()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    fn history(&self) -> MutexGuard<'_, HashMap<Tier, SeenUsage>> {
        self.usage_history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Range of normalised usage values previously accepted from `tier`.
    pub fn seen_usage(&self, tier: Tier) -> Option<SeenUsage> {
        self.history().get(&tier).copied()
    }

    pub fn observe_usage(&self, tier: Tier, usage: f64) {
        if !usage.is_finite() {
            return;
        }
        self.history()
            .entry(tier)
            .and_modify(|seen| seen.include(usage))
            .or_insert_with(|| SeenUsage::new(usage));
    }
}
