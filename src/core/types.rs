// src/core/types.rs — Core domain types

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::fields::{BillFields, FieldName};

/// One extraction method in the escalation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    StructuredText,
    Ocr,
    HostedVision,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::StructuredText, Tier::Ocr, Tier::HostedVision];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::StructuredText => "structured_text",
            Tier::Ocr => "ocr",
            Tier::HostedVision => "hosted_vision",
        }
    }

    /// Whether the tier's adapter blocks on network I/O. Only these retry.
    pub fn is_network(&self) -> bool {
        matches!(self, Tier::HostedVision)
    }

    /// Whether the tier generates values rather than locating them.
    /// Free-form tiers are subject to evidence anchoring.
    pub fn is_free_form(&self) -> bool {
        matches!(self, Tier::HostedVision)
    }

    pub fn default_max_attempts(&self) -> u32 {
        if self.is_network() {
            3
        } else {
            1
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "structured_text" | "text" => Ok(Tier::StructuredText),
            "ocr" => Ok(Tier::Ocr),
            "hosted_vision" | "vision" => Ok(Tier::HostedVision),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// A submitted document. Immutable; owned by one `process` call.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Arc<[u8]>,
    media_type: String,
    hash: String,
}

impl Document {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: &str) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let hash = content_hash(&bytes);
        Self {
            bytes: bytes.into(),
            media_type: normalize_media_type(media_type),
            hash,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// SHA-256 of the content, lowercase hex.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase and drop parameters: "Text/Plain; charset=utf-8" -> "text/plain".
fn normalize_media_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub field: Option<FieldName>,
    /// Stable dotted identifier, e.g. `cross_field.total_mismatch`.
    pub rule: String,
    pub message: String,
    /// Tier whose attempt raised the issue; `None` for input checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        field: Option<FieldName>,
        rule: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            field,
            rule: rule.into(),
            message: message.into(),
            tier: None,
        }
    }

    pub fn error(field: Option<FieldName>, rule: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, field, rule, message)
    }

    pub fn warning(field: Option<FieldName>, rule: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, field, rule, message)
    }

    pub fn info(field: Option<FieldName>, rule: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, field, rule, message)
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// A located text span backing an extracted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub field: FieldName,
    pub token: String,
    /// Byte offset of `token` in the adapter's raw text.
    pub offset: usize,
}

/// Why a tier attempt produced no usable extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    #[error("tier unavailable: {reason}")]
    TierUnavailable { reason: String },

    #[error("transient failure after {calls} call(s): {message}")]
    TierTransientFailure { message: String, calls: u32 },

    #[error("tier rejected the document: {message}")]
    TierRejected { message: String },

    #[error("cost limit exceeded: {spent:.4} spent + {estimate:.4} estimated > {limit:.4}")]
    CostLimitExceeded {
        spent: f64,
        estimate: f64,
        limit: f64,
    },

    #[error("document timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// One tier invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub tier: Tier,
    pub fields: BillFields,
    /// Confidence as reported by the adapter, if any.
    pub raw_confidence: Option<f64>,
    /// Normalised confidence from the scorer. Always `None` when `error` is set.
    pub confidence: Option<f64>,
    pub raw_text: Option<String>,
    pub evidence: Vec<EvidenceSpan>,
    pub cost: f64,
    pub latency_ms: u64,
    /// Adapter calls made, retries included.
    pub calls: u32,
    pub issues: Vec<ValidationIssue>,
    pub error: Option<AttemptError>,
}

impl ExtractionAttempt {
    /// An attempt that ended without an extraction.
    pub fn failed(tier: Tier, error: AttemptError, cost: f64, latency_ms: u64, calls: u32) -> Self {
        Self {
            tier,
            fields: BillFields::default(),
            raw_confidence: None,
            confidence: None,
            raw_text: None,
            evidence: Vec::new(),
            cost,
            latency_ms,
            calls,
            issues: Vec::new(),
            error: Some(error),
        }
    }

    pub fn has_error_issue(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_error)
    }

    /// Accepted iff it succeeded, meets the threshold and carries no error issue.
    pub fn is_acceptable(&self, threshold: f64) -> bool {
        self.error.is_none()
            && !self.has_error_issue()
            && self.confidence.is_some_and(|c| c >= threshold)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.error, Some(AttemptError::TierUnavailable { .. }))
    }
}

/// Terminal state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Accepted,
    LowConfidenceUnverified,
    CostLimited,
    InputRejected,
    NoTierAvailable,
    Timeout,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Accepted => "accepted",
            Status::LowConfidenceUnverified => "low_confidence_unverified",
            Status::CostLimited => "cost_limited",
            Status::InputRejected => "input_rejected",
            Status::NoTierAvailable => "no_tier_available",
            Status::Timeout => "timeout",
        }
    }

    /// Whether downstream consumers should route the document to manual review.
    pub fn needs_review(&self) -> bool {
        !matches!(self, Status::Accepted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of processing one document. Created once; immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub document_hash: String,
    /// Index into `escalation_path` of the chosen attempt.
    pub chosen: Option<usize>,
    /// Every attempt, in tier order, rejected ones included.
    pub escalation_path: Vec<ExtractionAttempt>,
    /// Equal to the chosen attempt's confidence.
    pub final_confidence: Option<f64>,
    pub validation_issues: Vec<ValidationIssue>,
    pub status: Status,
}

impl ExtractionResult {
    pub fn new(
        document_hash: &str,
        escalation_path: Vec<ExtractionAttempt>,
        chosen: Option<usize>,
        input_issues: Vec<ValidationIssue>,
        status: Status,
    ) -> Self {
        let chosen = chosen.filter(|&i| i < escalation_path.len());
        let final_confidence = chosen.and_then(|i| escalation_path[i].confidence);
        let mut validation_issues = input_issues;
        validation_issues.extend(escalation_path.iter().flat_map(|a| a.issues.iter().cloned()));
        Self {
            document_hash: document_hash.into(),
            chosen,
            escalation_path,
            final_confidence,
            validation_issues,
            status,
        }
    }

    /// Result for a document that failed pre-extraction checks. No tier ran.
    pub fn input_rejected(document_hash: &str, issues: Vec<ValidationIssue>) -> Self {
        Self::new(document_hash, Vec::new(), None, issues, Status::InputRejected)
    }

    pub fn chosen_attempt(&self) -> Option<&ExtractionAttempt> {
        self.chosen.and_then(|i| self.escalation_path.get(i))
    }

    pub fn tier_used(&self) -> Option<Tier> {
        self.chosen_attempt().map(|a| a.tier)
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.escalation_path.iter().map(|a| a.tier).collect()
    }

    /// Total cost of every attempt made for this document.
    pub fn total_cost(&self) -> f64 {
        self.escalation_path.iter().map(|a| a.cost).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("ocr".parse::<Tier>().unwrap(), Tier::Ocr);
        assert_eq!("Hosted-Vision".parse::<Tier>().unwrap(), Tier::HostedVision);
        assert_eq!(Tier::StructuredText.to_string(), "structured_text");
        assert!("fax".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_serde_snake_case() {
        let json = serde_json::to_string(&Tier::HostedVision).unwrap();
        assert_eq!(json, "\"hosted_vision\"");
    }

    #[test]
    fn test_only_hosted_tier_is_network() {
        assert!(Tier::HostedVision.is_network());
        assert!(!Tier::Ocr.is_network());
        assert!(!Tier::StructuredText.is_network());
    }

    #[test]
    fn test_document_hash_and_media_type() {
        let doc = Document::new(b"hello".to_vec(), "Text/Plain; charset=utf-8");
        assert_eq!(doc.media_type(), "text/plain");
        assert_eq!(doc.size(), 5);
        assert_eq!(
            doc.hash(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_failed_attempt_has_no_confidence() {
        let a = ExtractionAttempt::failed(
            Tier::Ocr,
            AttemptError::TierUnavailable {
                reason: "missing".into(),
            },
            0.0,
            0,
            0,
        );
        assert!(a.confidence.is_none());
        assert!(a.is_unavailable());
        assert!(!a.is_acceptable(0.0));
    }

    #[test]
    fn test_error_issue_blocks_acceptance() {
        let mut a = ExtractionAttempt::failed(
            Tier::Ocr,
            AttemptError::TierRejected {
                message: "x".into(),
            },
            0.0,
            0,
            1,
        );
        a.error = None;
        a.confidence = Some(0.99);
        assert!(a.is_acceptable(0.7));
        a.issues.push(ValidationIssue::error(None, "test.rule", "boom"));
        assert!(!a.is_acceptable(0.7));
    }

    #[test]
    fn test_result_final_confidence_tracks_chosen() {
        let mut a = ExtractionAttempt::failed(
            Tier::StructuredText,
            AttemptError::TierRejected {
                message: "x".into(),
            },
            0.001,
            0,
            1,
        );
        a.error = None;
        a.confidence = Some(0.42);
        let r = ExtractionResult::new("h", vec![a], Some(0), vec![], Status::LowConfidenceUnverified);
        assert_eq!(r.final_confidence, Some(0.42));
        assert_eq!(r.tier_used(), Some(Tier::StructuredText));
        assert!((r.total_cost() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_input_rejected_has_no_attempts() {
        let r = ExtractionResult::input_rejected(
            "h",
            vec![ValidationIssue::error(None, "input.empty", "empty")],
        );
        assert!(r.escalation_path.is_empty());
        assert!(r.chosen_attempt().is_none());
        assert_eq!(r.status, Status::InputRejected);
        assert_eq!(r.validation_issues.len(), 1);
    }

    #[test]
    fn test_status_review_flag() {
        assert!(!Status::Accepted.needs_review());
        assert!(Status::CostLimited.needs_review());
        assert_eq!(Status::LowConfidenceUnverified.to_string(), "low_confidence_unverified");
    }

    #[test]
    fn test_attempt_error_serde_tagged() {
        let e = AttemptError::Timeout { elapsed_ms: 1500 };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["elapsed_ms"], 1500);
    }
}
