// src/core/cost.rs — Cost ledger and analytics

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{AttemptError, Tier};
use crate::infra::config::CostRates;

/// Where an entry's amount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    /// Static per-tier rate from configuration.
    Estimated,
    /// Actual cost reported by the adapter.
    Reported,
    /// Tier was not invoked (unavailable); zero cost.
    Skipped,
}

impl CostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostSource::Estimated => "estimated",
            CostSource::Reported => "reported",
            CostSource::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub tier: Tier,
    pub cost: f64,
    pub source: CostSource,
    pub document_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Funds held for a tier invocation that has not finished yet.
/// Hand it back through `settle` or `release`.
#[derive(Debug)]
#[must_use = "a reservation must be settled or released"]
pub struct Reservation {
    id: u64,
    tier: Tier,
    amount: f64,
}

impl Reservation {
    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<CostLedgerEntry>,
    session_total: f64,
    prior_total: f64,
    reserved: HashMap<u64, f64>,
    next_reservation: u64,
}

impl LedgerState {
    fn reserved_total(&self) -> f64 {
        self.reserved.values().sum()
    }

    fn push(&mut self, entry: CostLedgerEntry) {
        self.session_total += entry.cost;
        self.entries.push(entry);
    }
}

/// Session-scoped record of what every tier invocation cost.
///
/// All mutation goes through one mutex, so the cap check in
/// `try_reserve` and the later `settle` are serialised across the
/// concurrent documents of a batch.
#[derive(Debug)]
pub struct CostLedger {
    rates: CostRates,
    state: Mutex<LedgerState>,
}

impl CostLedger {
    pub fn new(rates: CostRates) -> Self {
        Self {
            rates,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Seed with the cumulative total of earlier sessions.
    pub fn with_prior_total(self, prior_total: f64) -> Self {
        self.lock().prior_total = prior_total;
        self
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // A panic while holding the lock cannot leave the totals
        // half-updated, so a poisoned guard is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Static cost of one invocation of `tier`.
    pub fn estimate(&self, tier: Tier) -> f64 {
        self.rates.rate(tier)
    }

    /// Atomically check that invoking `tier` keeps the session within
    /// `cap` and hold its estimate until the call finishes.
    pub fn try_reserve(&self, tier: Tier, cap: Option<f64>) -> Result<Reservation, AttemptError> {
        let estimate = self.estimate(tier);
        let mut state = self.lock();
        let committed = state.session_total + state.reserved_total();
        if let Some(limit) = cap {
            if committed + estimate > limit {
                return Err(AttemptError::CostLimitExceeded {
                    spent: committed,
                    estimate,
                    limit,
                });
            }
        }
        let id = state.next_reservation;
        state.next_reservation += 1;
        state.reserved.insert(id, estimate);
        Ok(Reservation {
            id,
            tier,
            amount: estimate,
        })
    }

    /// Convert a reservation into a ledger entry. A reported cost takes
    /// precedence over the reserved estimate.
    pub fn settle(
        &self,
        reservation: Reservation,
        reported: Option<f64>,
        document_hash: Option<&str>,
    ) -> CostLedgerEntry {
        let (cost, source) = match reported {
            Some(actual) if actual.is_finite() && actual >= 0.0 => (actual, CostSource::Reported),
            _ => (reservation.amount, CostSource::Estimated),
        };
        let entry = CostLedgerEntry {
            tier: reservation.tier,
            cost,
            source,
            document_hash: document_hash.map(String::from),
            timestamp: Utc::now(),
        };
        let mut state = self.lock();
        state.reserved.remove(&reservation.id);
        state.push(entry.clone());
        entry
    }

    /// Drop a reservation for a call that never reached the tier.
    pub fn release(&self, reservation: Reservation, document_hash: Option<&str>) -> CostLedgerEntry {
        self.lock().reserved.remove(&reservation.id);
        self.skip(reservation.tier, document_hash)
    }

    /// Zero-cost entry for a tier that was skipped as unavailable.
    pub fn skip(&self, tier: Tier, document_hash: Option<&str>) -> CostLedgerEntry {
        let entry = CostLedgerEntry {
            tier,
            cost: 0.0,
            source: CostSource::Skipped,
            document_hash: document_hash.map(String::from),
            timestamp: Utc::now(),
        };
        self.lock().push(entry.clone());
        entry
    }

    /// Append an entry directly, bypassing reservation.
    pub fn record(&self, tier: Tier, cost: f64) {
        self.lock().push(CostLedgerEntry {
            tier,
            cost,
            source: CostSource::Reported,
            document_hash: None,
            timestamp: Utc::now(),
        });
    }

    pub fn session_total(&self) -> f64 {
        self.lock().session_total
    }

    /// Prior sessions plus this one.
    pub fn cumulative_total(&self) -> f64 {
        let state = self.lock();
        state.prior_total + state.session_total
    }

    /// Estimates currently held by in-flight invocations.
    pub fn reserved_total(&self) -> f64 {
        self.lock().reserved_total()
    }

    pub fn entries(&self) -> Vec<CostLedgerEntry> {
        self.lock().entries.clone()
    }

    /// Entries belonging to one document.
    pub fn document_entries(&self, document_hash: &str) -> Vec<CostLedgerEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.document_hash.as_deref() == Some(document_hash))
            .cloned()
            .collect()
    }

    /// Cost for one document in this session.
    pub fn document_total(&self, document_hash: &str) -> f64 {
        self.document_entries(document_hash)
            .iter()
            .map(|e| e.cost)
            .sum()
    }

    pub fn by_tier(&self) -> Vec<TierCostEntry> {
        let state = self.lock();
        let mut totals: HashMap<Tier, TierCostEntry> = HashMap::new();
        for entry in &state.entries {
            let slot = totals.entry(entry.tier).or_insert(TierCostEntry {
                tier: entry.tier,
                cost: 0.0,
                invocations: 0,
                skipped: 0,
            });
            slot.cost += entry.cost;
            if entry.source == CostSource::Skipped {
                slot.skipped += 1;
            } else {
                slot.invocations += 1;
            }
        }
        let mut breakdown: Vec<_> = totals.into_values().collect();
        breakdown.sort_by_key(|e| e.tier);
        breakdown
    }

    pub fn summary(&self) -> String {
        let state = self.lock();
        format!(
            "${:.4} this session, ${:.4} cumulative ({} entries)",
            state.session_total,
            state.prior_total + state.session_total,
            state.entries.len()
        )
    }

    // ─── Analytics ──────────────────────────────────────────────

    /// Average spend per distinct document.
    pub fn avg_cost_per_document(&self) -> f64 {
        let state = self.lock();
        let mut per_doc: HashMap<&str, f64> = HashMap::new();
        for entry in &state.entries {
            if let Some(hash) = entry.document_hash.as_deref() {
                *per_doc.entry(hash).or_default() += entry.cost;
            }
        }
        if per_doc.is_empty() {
            return 0.0;
        }
        per_doc.values().sum::<f64>() / per_doc.len() as f64
    }

    pub fn analytics_report(&self) -> String {
        let session_total = self.session_total();
        let mut report = String::new();
        report.push_str("═══ Cost Analytics ═══\n");
        report.push_str(&format!("Session: ${:.4}\n", session_total));
        report.push_str(&format!("Cumulative: ${:.4}\n", self.cumulative_total()));
        report.push_str(&format!(
            "Avg cost/document: ${:.4}\n",
            self.avg_cost_per_document()
        ));

        let breakdown = self.by_tier();
        if !breakdown.is_empty() {
            report.push_str("\nBy Tier:\n");
            for entry in breakdown {
                let pct = if session_total > 0.0 {
                    entry.cost / session_total * 100.0
                } else {
                    0.0
                };
                report.push_str(&format!(
                    "  {}: ${:.4} ({} calls, {} skipped, {:.1}%)\n",
                    entry.tier, entry.cost, entry.invocations, entry.skipped, pct
                ));
            }
        }
        report
    }
}

/// Per-tier cost breakdown entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCostEntry {
    pub tier: Tier,
    pub cost: f64,
    pub invocations: u64,
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> CostLedger {
        CostLedger::new(CostRates::default())
    }

    #[test]
    fn test_ledger_new() {
        let l = ledger();
        assert_eq!(l.session_total(), 0.0);
        assert_eq!(l.cumulative_total(), 0.0);
        assert!(l.entries().is_empty());
        assert!(l.by_tier().is_empty());
    }

    #[test]
    fn test_record_accumulates() {
        let l = ledger();
        l.record(Tier::Ocr, 0.001);
        l.record(Tier::HostedVision, 0.03);
        assert!((l.session_total() - 0.031).abs() < 1e-12);
        assert_eq!(l.entries().len(), 2);
    }

    #[test]
    fn test_prior_total_in_cumulative_only() {
        let l = ledger().with_prior_total(5.0);
        l.record(Tier::Ocr, 0.5);
        assert!((l.session_total() - 0.5).abs() < 1e-12);
        assert!((l.cumulative_total() - 5.5).abs() < 1e-12);
    }

    #[test]
    fn test_reserve_without_cap_always_succeeds() {
        let l = ledger();
        let r = l.try_reserve(Tier::HostedVision, None).unwrap();
        assert_eq!(r.amount(), 0.02);
        assert!((l.reserved_total() - 0.02).abs() < 1e-12);
        l.settle(r, None, Some("abc"));
        assert_eq!(l.reserved_total(), 0.0);
        assert!((l.session_total() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_reserve_at_cap_boundary() {
        let l = ledger();
        let cap = Some(l.estimate(Tier::StructuredText));
        let r = l.try_reserve(Tier::StructuredText, cap).unwrap();
        l.settle(r, None, None);
        let err = l.try_reserve(Tier::Ocr, cap).unwrap_err();
        match err {
            AttemptError::CostLimitExceeded { spent, estimate, limit } => {
                assert_eq!(spent, 0.0001);
                assert_eq!(estimate, 0.001);
                assert_eq!(limit, 0.0001);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_outstanding_reservations_count_against_cap() {
        let l = ledger();
        let cap = Some(0.03);
        let first = l.try_reserve(Tier::HostedVision, cap).unwrap();
        assert!(l.try_reserve(Tier::HostedVision, cap).is_err());
        l.release(first, None);
        assert!(l.try_reserve(Tier::HostedVision, cap).is_ok());
    }

    #[test]
    fn test_reported_cost_takes_precedence() {
        let l = ledger();
        let r = l.try_reserve(Tier::HostedVision, None).unwrap();
        let charged = l.settle(r, Some(0.035), Some("doc"));
        assert_eq!(charged.cost, 0.035);
        let entries = l.entries();
        assert_eq!(entries[0].source, CostSource::Reported);
        assert_eq!(entries[0].document_hash.as_deref(), Some("doc"));
    }

    #[test]
    fn test_invalid_reported_cost_falls_back_to_estimate() {
        let l = ledger();
        let r = l.try_reserve(Tier::HostedVision, None).unwrap();
        assert_eq!(l.settle(r, Some(-1.0), None).cost, 0.02);
        assert_eq!(l.entries()[0].source, CostSource::Estimated);
    }

    #[test]
    fn test_release_records_zero_cost() {
        let l = ledger();
        let r = l.try_reserve(Tier::Ocr, None).unwrap();
        let entry = l.release(r, Some("doc"));
        assert_eq!(entry.source, CostSource::Skipped);
        assert_eq!(l.session_total(), 0.0);
        assert_eq!(l.reserved_total(), 0.0);
        assert_eq!(l.entries(), vec![entry]);
    }

    #[test]
    fn test_skip_records_zero_cost() {
        let l = ledger();
        let entry = l.skip(Tier::HostedVision, None);
        assert_eq!(entry.cost, 0.0);
        assert_eq!(l.by_tier()[0].skipped, 1);
    }

    #[test]
    fn test_document_totals() {
        let l = ledger();
        for hash in ["a", "a", "b"] {
            let r = l.try_reserve(Tier::Ocr, None).unwrap();
            l.settle(r, None, Some(hash));
        }
        assert!((l.document_total("a") - 0.002).abs() < 1e-12);
        assert_eq!(l.document_entries("b").len(), 1);
        assert_eq!(l.document_total("missing"), 0.0);
        assert!((l.avg_cost_per_document() - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn test_by_tier_breakdown_sorted() {
        let l = ledger();
        l.record(Tier::HostedVision, 0.02);
        l.record(Tier::StructuredText, 0.0001);
        let r = l.try_reserve(Tier::Ocr, None).unwrap();
        l.release(r, None);
        let breakdown = l.by_tier();
        let tiers: Vec<Tier> = breakdown.iter().map(|e| e.tier).collect();
        assert_eq!(tiers, vec![Tier::StructuredText, Tier::Ocr, Tier::HostedVision]);
        assert_eq!(breakdown[1].skipped, 1);
        assert_eq!(breakdown[1].invocations, 0);
    }

    #[test]
    fn test_summary_and_report() {
        let l = ledger().with_prior_total(1.0);
        l.record(Tier::HostedVision, 0.02);
        let s = l.summary();
        assert!(s.starts_with("$0.0200 this session"));
        assert!(s.contains("$1.0200 cumulative"));
        let report = l.analytics_report();
        assert!(report.contains("Cost Analytics"));
        assert!(report.contains("By Tier:"));
        assert!(report.contains("hosted_vision"));
    }
}
