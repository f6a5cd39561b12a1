// src/core/scorer.rs — Confidence scoring

use super::fields::{BillFields, Field, FieldName};
use super::types::ExtractionAttempt;
use crate::infra::config::{Config, RangesConfig, ScoringConfig};

/// Outcome of the usage × rate ≈ total identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossFieldCheck {
    pub expected_total: f64,
    pub declared_total: f64,
    /// |expected − declared| / declared
    pub relative_deviation: f64,
    pub consistent: bool,
}

/// Evaluate usage × rate against the declared total. `None` when any of
/// the three is not a parsed number.
pub fn cross_field_check(fields: &BillFields, tolerance: f64) -> Option<CrossFieldCheck> {
    let usage = *fields.usage_amount.value()?;
    let rate = *fields.rate.value()?;
    let declared_total = *fields.total_cost.value()?;

    let expected_total = usage * rate;
    let relative_deviation = if declared_total.abs() > f64::EPSILON {
        (expected_total - declared_total).abs() / declared_total.abs()
    } else if expected_total.abs() > f64::EPSILON {
        f64::INFINITY
    } else {
        0.0
    };

    Some(CrossFieldCheck {
        expected_total,
        declared_total,
        relative_deviation,
        consistent: relative_deviation <= tolerance,
    })
}

/// Turns an attempt's fields into a normalised trust score in [0, 1].
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    scoring: ScoringConfig,
    ranges: RangesConfig,
}

impl ConfidenceScorer {
    pub fn new(scoring: ScoringConfig, ranges: RangesConfig) -> Self {
        Self { scoring, ranges }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.scoring.clone(), config.ranges.clone())
    }

    /// 1.0 present and plausible, 0.5 present but implausible or
    /// malformed, 0.0 absent.
    pub fn field_score(&self, fields: &BillFields, name: FieldName) -> f64 {
        if !fields.is_present(name) {
            return 0.0;
        }
        if fields.is_malformed(name) {
            return 0.5;
        }
        let plausible = match name {
            FieldName::UsageAmount => fields
                .normalized_usage()
                .is_some_and(|u| self.ranges.usage_amount.contains(u)),
            FieldName::Rate => fields
                .normalized_rate()
                .is_some_and(|r| self.ranges.rate.contains(r)),
            FieldName::TotalCost => fields
                .total_cost
                .value()
                .is_some_and(|t| self.ranges.total_cost.contains(*t)),
            FieldName::UsageUnit => match &fields.usage_unit {
                Field::Parsed(unit) => unit.is_recognized(),
                _ => false,
            },
            FieldName::AccountNumber
            | FieldName::BillingPeriodStart
            | FieldName::BillingPeriodEnd
            | FieldName::RegionCode => true,
        };
        if plausible {
            1.0
        } else {
            0.5
        }
    }

    /// Weighted mean of the per-field scores, with the cross-field penalty
    /// applied when the usage × rate identity fails.
    pub fn field_derived(&self, fields: &BillFields) -> f64 {
        let (weighted, total_weight) = FieldName::ALL.iter().fold((0.0, 0.0), |(acc, w), &f| {
            let weight = self.scoring.weight(f);
            (acc + weight * self.field_score(fields, f), w + weight)
        });
        if total_weight <= 0.0 {
            return 0.0;
        }

        let mut score = weighted / total_weight;
        if let Some(check) = cross_field_check(fields, self.scoring.cross_field_tolerance) {
            if !check.consistent {
                score *= self.scoring.cross_field_penalty;
            }
        }
        score.clamp(0.0, 1.0)
    }

    /// Final confidence: the field-derived score, capped by the adapter's
    /// own number when it reports one. `None` for failed attempts.
    pub fn score(&self, attempt: &ExtractionAttempt) -> Option<f64> {
        if attempt.error.is_some() {
            return None;
        }
        let derived = self.field_derived(&attempt.fields);
        let score = match attempt.raw_confidence {
            Some(reported) => derived.min(reported.clamp(0.0, 1.0)),
            None => derived,
        };
        Some(score)
    }
}
