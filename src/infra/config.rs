// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::core::fields::FieldName;
use crate::core::types::Tier;
use crate::infra::errors::BillwiseError;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub ranges: RangesConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub costs: CostRates,

    #[serde(default)]
    pub tiers: TiersConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub confidence_threshold: f64,
    pub tier_order: Vec<Tier>,
    /// Monetary ceiling for the whole session. `None` = unlimited.
    pub cost_cap: Option<f64>,
    pub document_timeout_secs: u64,
    /// Region reported when the bill itself carries none.
    pub default_region: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            tier_order: Tier::ALL.to_vec(),
            cost_cap: None,
            document_timeout_secs: 120,
            default_region: "US_AVERAGE".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Relative tolerance for usage × rate ≈ total.
    pub cross_field_tolerance: f64,
    /// Multiplier applied when the cross-field identity fails.
    pub cross_field_penalty: f64,
    pub required_weight: f64,
    pub optional_weight: f64,
    pub required_fields: Vec<FieldName>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cross_field_tolerance: 0.05,
            cross_field_penalty: 0.8,
            required_weight: 3.0,
            optional_weight: 0.5,
            required_fields: vec![
                FieldName::UsageAmount,
                FieldName::UsageUnit,
                FieldName::Rate,
            ],
        }
    }
}

impl ScoringConfig {
    pub fn is_required(&self, field: FieldName) -> bool {
        self.required_fields.contains(&field)
    }

    pub fn weight(&self, field: FieldName) -> f64 {
        if self.is_required(field) {
            self.required_weight
        } else {
            self.optional_weight
        }
    }
}

/// Inclusive plausible range for a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
}

impl FieldRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Plausible ranges. Usage is in kWh-normalised units; rate is per kWh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangesConfig {
    pub usage_amount: FieldRange,
    pub rate: FieldRange,
    pub total_cost: FieldRange,
}

impl Default for RangesConfig {
    fn default() -> Self {
        Self {
            usage_amount: FieldRange::new(10.0, 50_000.0),
            rate: FieldRange::new(0.01, 5.00),
            total_cost: FieldRange::new(1.0, 100_000.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_document_bytes: u64,
    pub allowed_media_types: Vec<String>,
    pub max_billing_days: i64,
    /// Usage this many times outside the tier's seen range is flagged.
    pub plausibility_factor: f64,
    pub anchor_relative_tolerance: f64,
    pub earliest_year: i32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: 25 * 1024 * 1024,
            allowed_media_types: vec![
                "application/pdf".into(),
                "image/png".into(),
                "image/jpeg".into(),
                "image/tiff".into(),
                "text/plain".into(),
            ],
            max_billing_days: 60,
            plausibility_factor: 100.0,
            anchor_relative_tolerance: 0.005,
            earliest_year: 1990,
        }
    }
}

/// Static per-tier cost estimates, in the bill's currency per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostRates {
    pub structured_text: f64,
    pub ocr: f64,
    pub hosted_vision: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            structured_text: 0.0001,
            ocr: 0.001,
            hosted_vision: 0.02,
        }
    }
}

impl CostRates {
    pub fn rate(&self, tier: Tier) -> f64 {
        match tier {
            Tier::StructuredText => self.structured_text,
            Tier::Ocr => self.ocr,
            Tier::HostedVision => self.hosted_vision,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub structured_text: TierSettings,
    pub ocr: TierSettings,
    pub hosted_vision: TierSettings,
}

impl TiersConfig {
    pub fn get(&self, tier: Tier) -> &TierSettings {
        match tier {
            Tier::StructuredText => &self.structured_text,
            Tier::Ocr => &self.ocr,
            Tier::HostedVision => &self.hosted_vision,
        }
    }

    /// Calls allowed per tier within one document, including the first.
    pub fn max_attempts(&self, tier: Tier) -> u32 {
        self.get(tier)
            .max_attempts
            .unwrap_or_else(|| tier.default_max_attempts())
            .max(1)
    }
}

/// Adapter wiring for one tier. Either `command` (process adapter) or
/// `endpoint` (HTTP adapter) is expected; with neither the tier is
/// reported unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    pub enabled: bool,
    pub max_attempts: Option<u32>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub endpoint: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub request_timeout_secs: u64,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
            command: None,
            args: Vec::new(),
            endpoint: None,
            headers: BTreeMap::new(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 8_000,
            jitter_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Documents processed concurrently in batch mode.
    pub max_concurrency: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self, BillwiseError> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, BillwiseError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), BillwiseError> {
        let p = &self.pipeline;
        if p.tier_order.is_empty() {
            return Err(BillwiseError::Config("tier_order must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for tier in &p.tier_order {
            if !seen.insert(*tier) {
                return Err(BillwiseError::Config(format!(
                    "tier_order lists '{tier}' more than once"
                )));
            }
        }
        if !(0.0..=1.0).contains(&p.confidence_threshold) {
            return Err(BillwiseError::Config(format!(
                "confidence_threshold {} outside [0, 1]",
                p.confidence_threshold
            )));
        }
        if let Some(cap) = p.cost_cap {
            if cap < 0.0 {
                return Err(BillwiseError::Config(format!("cost_cap {cap} is negative")));
            }
        }
        if p.document_timeout_secs == 0 {
            return Err(BillwiseError::Config(
                "document_timeout_secs must be positive".into(),
            ));
        }

        let s = &self.scoring;
        if s.cross_field_tolerance <= 0.0 {
            return Err(BillwiseError::Config(
                "cross_field_tolerance must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&s.cross_field_penalty) {
            return Err(BillwiseError::Config(
                "cross_field_penalty must be within [0, 1]".into(),
            ));
        }
        if s.required_weight <= 0.0 || s.optional_weight < 0.0 {
            return Err(BillwiseError::Config("field weights must be positive".into()));
        }
        if s.required_weight < s.optional_weight {
            return Err(BillwiseError::Config(
                "required_weight must not be lower than optional_weight".into(),
            ));
        }

        for (name, range) in [
            ("usage_amount", &self.ranges.usage_amount),
            ("rate", &self.ranges.rate),
            ("total_cost", &self.ranges.total_cost),
        ] {
            if range.min > range.max {
                return Err(BillwiseError::Config(format!(
                    "range for {name} is inverted ({} > {})",
                    range.min, range.max
                )));
            }
        }

        if self.workers.max_concurrency == 0 {
            return Err(BillwiseError::Config(
                "workers.max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert!((c.pipeline.confidence_threshold - 0.70).abs() < 1e-9);
        assert_eq!(
            c.pipeline.tier_order,
            vec![Tier::StructuredText, Tier::Ocr, Tier::HostedVision]
        );
        assert!(c.pipeline.cost_cap.is_none());
        assert!((c.scoring.cross_field_tolerance - 0.05).abs() < 1e-9);
        assert_eq!(c.workers.max_concurrency, 4);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_max_attempts_defaults_per_tier() {
        let t = TiersConfig::default();
        assert_eq!(t.max_attempts(Tier::StructuredText), 1);
        assert_eq!(t.max_attempts(Tier::Ocr), 1);
        assert_eq!(t.max_attempts(Tier::HostedVision), 3);
    }

    #[test]
    fn test_required_weighted_higher() {
        let s = ScoringConfig::default();
        assert!(s.weight(FieldName::Rate) > s.weight(FieldName::RegionCode));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.tier_order.len(), 3);
        assert!((config.costs.hosted_vision - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[pipeline]
confidence_threshold = 0.85
tier_order = ["ocr", "hosted_vision"]
cost_cap = 0.5
document_timeout_secs = 30

[scoring]
cross_field_tolerance = 0.02
required_fields = ["usage_amount", "total_cost"]

[ranges.rate]
min = 0.05
max = 0.60

[costs]
hosted_vision = 0.03

[tiers.ocr]
command = "ocr-extract"
args = ["--json"]

[tiers.hosted_vision]
endpoint = "https://vision.example.com/extract"
max_attempts = 5

[workers]
max_concurrency = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!((config.pipeline.confidence_threshold - 0.85).abs() < 1e-9);
        assert_eq!(config.pipeline.tier_order, vec![Tier::Ocr, Tier::HostedVision]);
        assert_eq!(config.pipeline.cost_cap, Some(0.5));
        // untouched keys keep their defaults
        assert_eq!(config.pipeline.default_region, "US_AVERAGE");
        assert!(config.scoring.is_required(FieldName::TotalCost));
        assert!(!config.scoring.is_required(FieldName::Rate));
        assert_eq!(config.ranges.rate, FieldRange::new(0.05, 0.60));
        assert_eq!(config.ranges.usage_amount, FieldRange::new(10.0, 50_000.0));
        assert!((config.costs.rate(Tier::HostedVision) - 0.03).abs() < 1e-9);
        assert_eq!(config.tiers.ocr.command.as_deref(), Some("ocr-extract"));
        assert_eq!(config.tiers.max_attempts(Tier::HostedVision), 5);
        assert_eq!(config.workers.max_concurrency, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_tiers() {
        let mut c = Config::default();
        c.pipeline.tier_order = vec![Tier::Ocr, Tier::Ocr];
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_rejects_empty_order_and_bad_threshold() {
        let mut c = Config::default();
        c.pipeline.tier_order.clear();
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.pipeline.confidence_threshold = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut c = Config::default();
        c.ranges.rate = FieldRange::new(5.0, 0.01);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut c = Config::default();
        c.workers.max_concurrency = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.pipeline.tier_order, config.pipeline.tier_order);
        assert!((deserialized.costs.ocr - config.costs.ocr).abs() < 1e-9);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_field_range_inclusive() {
        let r = FieldRange::new(0.01, 5.0);
        assert!(r.contains(0.01));
        assert!(r.contains(5.0));
        assert!(!r.contains(5.01));
    }
}
