// src/core/output.rs — Record handed to calculation and reporting

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::types::{ExtractionResult, Status, Tier, ValidationIssue};

/// Flat view of an `ExtractionResult` for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub document_hash: String,
    pub tier_used: Option<Tier>,
    pub usage_amount: Option<f64>,
    pub usage_unit: Option<String>,
    pub billing_period_start: Option<NaiveDate>,
    pub billing_period_end: Option<NaiveDate>,
    pub rate: Option<f64>,
    /// `rate` was computed from total / usage, not read off the bill.
    #[serde(default)]
    pub rate_derived: bool,
    pub region_code: String,
    pub final_confidence: Option<f64>,
    pub status: Status,
    pub needs_review: bool,
    pub validation_issues: Vec<ValidationIssue>,
    /// Summed cost of every attempt made for the document.
    pub cost: f64,
}

impl OutputRecord {
    /// Build from a result. `default_region` fills in a missing region
    /// code so the emissions step always has a factor to look up.
    pub fn from_result(result: &ExtractionResult, default_region: &str) -> Self {
        let fields = result.chosen_attempt().map(|a| &a.fields);
        Self {
            document_hash: result.document_hash.clone(),
            tier_used: result.tier_used(),
            usage_amount: fields.and_then(|f| f.usage_amount.value().copied()),
            usage_unit: fields.and_then(|f| f.usage_unit.value().map(|u| u.canonical().to_string())),
            billing_period_start: fields.and_then(|f| f.billing_period_start.value().copied()),
            billing_period_end: fields.and_then(|f| f.billing_period_end.value().copied()),
            rate: fields.and_then(|f| f.effective_rate()),
            rate_derived: fields.is_some_and(|f| f.derived_rate().is_some()),
            region_code: fields
                .and_then(|f| f.region_code.value().cloned())
                .unwrap_or_else(|| default_region.to_string()),
            final_confidence: result.final_confidence,
            status: result.status,
            needs_review: result.status.needs_review(),
            validation_issues: result.validation_issues.clone(),
            cost: result.total_cost(),
        }
    }
}
