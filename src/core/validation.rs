// src/core/validation.rs — Pre- and post-extraction validation
//
// Pre-extraction checks decide whether any tier runs at all. Post-extraction
// checks attach issues to a single attempt; an `error` issue makes the
// attempt unacceptable regardless of its confidence.

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::fields::{BillFields, Field, FieldName, UsageUnit};
use super::scorer::cross_field_check;
use super::types::{Document, EvidenceSpan, Tier, ValidationIssue};
use crate::infra::config::{Config, FieldRange, RangesConfig, ScoringConfig, ValidationConfig};

/// Smallest and largest normalised usage seen from one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeenUsage {
    pub min: f64,
    pub max: f64,
}

impl SeenUsage {
    pub fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Issues and located evidence for one attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostValidation {
    pub issues: Vec<ValidationIssue>,
    pub evidence: Vec<EvidenceSpan>,
}

impl PostValidation {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_error)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationEngine {
    limits: ValidationConfig,
    ranges: RangesConfig,
    scoring: ScoringConfig,
}

impl ValidationEngine {
    pub fn new(limits: ValidationConfig, ranges: RangesConfig, scoring: ScoringConfig) -> Self {
        Self {
            limits,
            ranges,
            scoring,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.validation.clone(),
            config.ranges.clone(),
            config.scoring.clone(),
        )
    }

    // ─── Pre-extraction ─────────────────────────────────────────

    /// Document sanity. Any returned issue is an `error`; a non-empty
    /// result means the document is rejected before any tier runs.
    pub fn check_input(&self, document: &Document) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if document.size() == 0 {
            issues.push(ValidationIssue::error(
                None,
                "input.empty",
                "Document is empty",
            ));
        }

        if document.size() > self.limits.max_document_bytes {
            issues.push(ValidationIssue::error(
                None,
                "input.too_large",
                format!(
                    "Document is {} bytes; limit is {} bytes",
                    document.size(),
                    self.limits.max_document_bytes
                ),
            ));
        }

        let allowed = self
            .limits
            .allowed_media_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(document.media_type()));
        if !allowed {
            issues.push(ValidationIssue::error(
                None,
                "input.media_type",
                format!("Media type '{}' is not accepted", document.media_type()),
            ));
        }

        issues
    }

    // ─── Post-extraction ────────────────────────────────────────

    /// Validate one attempt's fields. `seen` is the usage range previously
    /// observed from the same tier, if any.
    pub fn check_attempt(
        &self,
        tier: Tier,
        fields: &BillFields,
        raw_text: Option<&str>,
        seen: Option<SeenUsage>,
    ) -> PostValidation {
        let mut issues = Vec::new();

        self.check_required(fields, &mut issues);
        self.check_derived_rate(fields, &mut issues);
        self.check_malformed(fields, &mut issues);
        self.check_ranges(fields, &mut issues);
        self.check_cross_field(fields, &mut issues);
        self.check_period(fields, &mut issues);
        self.check_unit(fields, seen, &mut issues);

        if !fields.extras.is_empty() {
            let keys: Vec<&str> = fields.extras.keys().map(String::as_str).collect();
            issues.push(ValidationIssue::info(
                None,
                "schema.extra_keys",
                format!("Ignored unrecognised keys: {}", keys.join(", ")),
            ));
        }

        let evidence = raw_text
            .map(|text| locate_evidence(fields, text, self.limits.anchor_relative_tolerance))
            .unwrap_or_default();

        if tier.is_free_form() {
            for name in FieldName::NUMERIC {
                if fields.number(name).is_none() {
                    continue;
                }
                if !evidence.iter().any(|e| e.field == name) {
                    issues.push(ValidationIssue::error(
                        Some(name),
                        "evidence.unanchored",
                        format!(
                            "Possible hallucination: {name} does not appear in the source text"
                        ),
                    ));
                }
            }
        }

        for issue in &mut issues {
            issue.tier = Some(tier);
        }
        PostValidation { issues, evidence }
    }

    fn check_required(&self, fields: &BillFields, issues: &mut Vec<ValidationIssue>) {
        for &name in &self.scoring.required_fields {
            // A rate implied by total / usage stands in for a stated one.
            if name == FieldName::Rate && fields.derived_rate().is_some() {
                continue;
            }
            if !fields.is_present(name) {
                issues.push(ValidationIssue::error(
                    Some(name),
                    "field.required_missing",
                    format!("Required field {name} was not extracted"),
                ));
            }
        }
    }

    fn check_derived_rate(&self, fields: &BillFields, issues: &mut Vec<ValidationIssue>) {
        let Some(rate) = fields.derived_rate() else {
            return;
        };
        issues.push(ValidationIssue::info(
            Some(FieldName::Rate),
            "rate.derived",
            format!("No rate on the bill; derived {rate:.4} from total_cost / usage_amount"),
        ));
    }

    fn check_malformed(&self, fields: &BillFields, issues: &mut Vec<ValidationIssue>) {
        for name in FieldName::ALL {
            if fields.is_malformed(name) {
                issues.push(ValidationIssue::warning(
                    Some(name),
                    "field.malformed",
                    format!("{name} is present but could not be parsed"),
                ));
            }
        }
    }

    fn check_ranges(&self, fields: &BillFields, issues: &mut Vec<ValidationIssue>) {
        let checks: [(FieldName, &str, Option<f64>, &FieldRange); 3] = [
            (
                FieldName::UsageAmount,
                "range.usage_amount",
                fields.normalized_usage(),
                &self.ranges.usage_amount,
            ),
            (
                FieldName::Rate,
                "range.rate",
                fields.normalized_effective_rate(),
                &self.ranges.rate,
            ),
            (
                FieldName::TotalCost,
                "range.total_cost",
                fields.total_cost.value().copied(),
                &self.ranges.total_cost,
            ),
        ];
        for (name, rule, value, range) in checks {
            let Some(value) = value else { continue };
            if !range.contains(value) {
                issues.push(ValidationIssue::warning(
                    Some(name),
                    rule,
                    format!(
                        "{name} {value} is outside the plausible range {}–{}",
                        range.min, range.max
                    ),
                ));
            }
        }
    }

    fn check_cross_field(&self, fields: &BillFields, issues: &mut Vec<ValidationIssue>) {
        let Some(check) = cross_field_check(fields, self.scoring.cross_field_tolerance) else {
            return;
        };
        if !check.consistent {
            issues.push(ValidationIssue::warning(
                Some(FieldName::TotalCost),
                "cross_field.total_mismatch",
                format!(
                    "usage × rate = {:.2} but declared total is {:.2} ({:.1}% off, tolerance {:.1}%)",
                    check.expected_total,
                    check.declared_total,
                    check.relative_deviation * 100.0,
                    self.scoring.cross_field_tolerance * 100.0
                ),
            ));
        }
    }

    fn check_period(&self, fields: &BillFields, issues: &mut Vec<ValidationIssue>) {
        let current_year = Utc::now().year();
        for (name, date) in [
            (FieldName::BillingPeriodStart, &fields.billing_period_start),
            (FieldName::BillingPeriodEnd, &fields.billing_period_end),
        ] {
            let Field::Parsed(d) = date else { continue };
            if d.year() < self.limits.earliest_year || d.year() > current_year {
                issues.push(ValidationIssue::warning(
                    Some(name),
                    "period.unusual_year",
                    format!("Unusual year {} in {name}", d.year()),
                ));
            }
        }

        let (Some(start), Some(end)) = (
            fields.billing_period_start.value(),
            fields.billing_period_end.value(),
        ) else {
            return;
        };
        if end <= start {
            issues.push(ValidationIssue::error(
                Some(FieldName::BillingPeriodEnd),
                "period.inverted",
                format!("Billing period ends ({end}) on or before it starts ({start})"),
            ));
            return;
        }
        let days = billing_days(*start, *end);
        if days > self.limits.max_billing_days {
            issues.push(ValidationIssue::warning(
                Some(FieldName::BillingPeriodEnd),
                "period.too_long",
                format!(
                    "Billing period of {days} days exceeds {} days",
                    self.limits.max_billing_days
                ),
            ));
        }
    }

    fn check_unit(
        &self,
        fields: &BillFields,
        seen: Option<SeenUsage>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if let Field::Parsed(UsageUnit::Other(raw)) = &fields.usage_unit {
            issues.push(ValidationIssue::info(
                Some(FieldName::UsageUnit),
                "unit.assumed_kwh",
                format!("Unrecognised unit '{raw}', treated as kWh"),
            ));
        }

        let (Some(usage), Some(seen)) = (fields.normalized_usage(), seen) else {
            return;
        };
        let factor = self.limits.plausibility_factor;
        if usage > seen.max * factor || usage < seen.min / factor {
            issues.push(ValidationIssue::warning(
                Some(FieldName::UsageAmount),
                "unit.implausible_magnitude",
                format!(
                    "Usage {usage} is more than {factor}× outside previously seen values ({}–{})",
                    seen.min, seen.max
                ),
            ));
        }
    }
}

fn billing_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

fn numeric_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?|\.\d+").expect("valid token regex"))
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b\d{4}[-/.]\d{1,2}[-/.]\d{1,2}\b|\b\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4}\b")
            .expect("valid date regex")
    })
}

/// A number found in the source text.
#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    offset: usize,
    text: &'a str,
    value: f64,
    /// Lowercased text right after the number, whitespace skipped.
    suffix: &'a str,
}

impl Token<'_> {
    fn followed_by(&self, words: &[&str]) -> bool {
        let suffix = self.suffix.trim_start();
        words.iter().any(|w| {
            suffix
                .get(..w.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(w))
        })
    }
}

/// Numeric tokens of `text`, leaving out any that belong to a date.
fn numeric_tokens(text: &str) -> Vec<Token<'_>> {
    let dates: Vec<(usize, usize)> = date_pattern()
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();
    numeric_token_pattern()
        .find_iter(text)
        .filter(|m| !dates.iter().any(|&(s, e)| m.start() < e && m.end() > s))
        .filter_map(|m| {
            let value = m.as_str().replace(',', "").parse::<f64>().ok()?;
            Some(Token {
                offset: m.start(),
                text: m.as_str(),
                value,
                suffix: &text[m.end()..],
            })
        })
        .collect()
}

fn within(candidate: f64, value: f64, tolerance: f64) -> bool {
    (candidate - value).abs() / value.abs().max(f64::EPSILON) <= tolerance
}

/// Whether `token` restates `value` in another unit. Usage may switch
/// between kWh and MWh, money between dollars and cents, and only when
/// the text names the unit it is switching to.
fn paraphrase_matches(field: FieldName, token: &Token<'_>, value: f64, tolerance: f64) -> bool {
    match field {
        FieldName::UsageAmount => {
            (token.followed_by(&["mwh"]) && within(token.value * 1000.0, value, tolerance))
                || (token.followed_by(&["kwh"]) && within(token.value * 0.001, value, tolerance))
        }
        FieldName::Rate | FieldName::TotalCost => {
            token.followed_by(&["¢", "cent", "c/kwh"])
                && within(token.value * 0.01, value, tolerance)
        }
        _ => false,
    }
}

/// Locate literal numeric tokens in `text` backing each numeric field.
/// The first exact match wins; a field-specific paraphrase is used only
/// without one. Numbers inside dates never count as evidence.
pub fn locate_evidence(fields: &BillFields, text: &str, tolerance: f64) -> Vec<EvidenceSpan> {
    let tokens = numeric_tokens(text);

    let mut spans = Vec::new();
    for name in FieldName::NUMERIC {
        let Some(value) = fields.number(name) else {
            continue;
        };
        let found = tokens
            .iter()
            .find(|t| within(t.value, value, tolerance))
            .or_else(|| {
                tokens
                    .iter()
                    .find(|t| paraphrase_matches(name, t, value, tolerance))
            });
        if let Some(token) = found {
            spans.push(EvidenceSpan {
                field: name,
                token: token.text.to_string(),
                offset: token.offset,
            });
        }
    }
    spans
}
