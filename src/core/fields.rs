// src/core/fields.rs — Typed bill field schema
//
// Adapters hand back loosely typed JSON maps. Everything past the
// validation boundary works with `BillFields` instead: a fixed set of
// named, typed slots plus `extras` for keys nobody asked for.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    AccountNumber,
    UsageAmount,
    UsageUnit,
    BillingPeriodStart,
    BillingPeriodEnd,
    Rate,
    TotalCost,
    RegionCode,
}

impl FieldName {
    pub const ALL: [FieldName; 8] = [
        FieldName::AccountNumber,
        FieldName::UsageAmount,
        FieldName::UsageUnit,
        FieldName::BillingPeriodStart,
        FieldName::BillingPeriodEnd,
        FieldName::Rate,
        FieldName::TotalCost,
        FieldName::RegionCode,
    ];

    /// Numeric fields: the ones evidence anchoring applies to.
    pub const NUMERIC: [FieldName; 3] =
        [FieldName::UsageAmount, FieldName::Rate, FieldName::TotalCost];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::AccountNumber => "account_number",
            FieldName::UsageAmount => "usage_amount",
            FieldName::UsageUnit => "usage_unit",
            FieldName::BillingPeriodStart => "billing_period_start",
            FieldName::BillingPeriodEnd => "billing_period_end",
            FieldName::Rate => "rate",
            FieldName::TotalCost => "total_cost",
            FieldName::RegionCode => "region_code",
        }
    }

    /// Keys adapters are known to use for this field.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            FieldName::AccountNumber => &["account_number", "account", "account_no"],
            FieldName::UsageAmount => &["usage_amount", "total_usage", "usage", "total_kwh"],
            FieldName::UsageUnit => &["usage_unit", "unit"],
            FieldName::BillingPeriodStart => {
                &["billing_period_start", "service_start_date", "period_start"]
            }
            FieldName::BillingPeriodEnd => &["billing_period_end", "service_end_date", "period_end"],
            FieldName::Rate => &["rate", "unit_price", "rate_per_kwh", "price_per_unit"],
            FieldName::TotalCost => &["total_cost", "amount_due", "total", "total_amount"],
            FieldName::RegionCode => &["region_code", "region", "egrid_region"],
        }
    }

    pub fn from_key(key: &str) -> Option<FieldName> {
        let key = key.trim().to_ascii_lowercase();
        FieldName::ALL
            .into_iter()
            .find(|f| f.aliases().contains(&key.as_str()))
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot of the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Field<T> {
    Missing,
    Parsed(T),
    /// Present but not coercible to the slot's type; the raw value is kept.
    Malformed(Value),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Missing
    }
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Parsed(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Field::Missing)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Field::Malformed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageUnit {
    Kwh,
    Mwh,
    Therms,
    Ccf,
    Other(String),
}

impl UsageUnit {
    pub fn parse(raw: &str) -> Option<UsageUnit> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let unit = match trimmed.to_ascii_lowercase().as_str() {
            "kwh" | "kw-h" | "kw h" | "kilowatt hours" | "kilowatt-hours" => UsageUnit::Kwh,
            "mwh" | "megawatt hours" | "megawatt-hours" => UsageUnit::Mwh,
            "therm" | "therms" | "thm" => UsageUnit::Therms,
            "ccf" => UsageUnit::Ccf,
            _ => UsageUnit::Other(trimmed.to_string()),
        };
        Some(unit)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, UsageUnit::Other(_))
    }

    /// Multiplier into the unit plausible ranges are expressed in.
    /// Electric usage normalises to kWh; gas units stay as they are.
    pub fn normalization_factor(&self) -> f64 {
        match self {
            UsageUnit::Mwh => 1000.0,
            _ => 1.0,
        }
    }

    pub fn canonical(&self) -> &str {
        match self {
            UsageUnit::Kwh => "kWh",
            UsageUnit::Mwh => "MWh",
            UsageUnit::Therms => "therms",
            UsageUnit::Ccf => "CCF",
            UsageUnit::Other(s) => s,
        }
    }
}

impl fmt::Display for UsageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// The typed extraction schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillFields {
    pub account_number: Field<String>,
    pub usage_amount: Field<f64>,
    pub usage_unit: Field<UsageUnit>,
    pub billing_period_start: Field<NaiveDate>,
    pub billing_period_end: Field<NaiveDate>,
    pub rate: Field<f64>,
    pub total_cost: Field<f64>,
    pub region_code: Field<String>,
    /// Keys that map to no schema field.
    pub extras: BTreeMap<String, Value>,
}

impl BillFields {
    /// Map an adapter's loose field dictionary onto the schema.
    /// JSON `null` counts as missing. When several aliases of one field
    /// are present, the first non-null one in key order wins.
    pub fn from_raw(raw: &Map<String, Value>) -> Self {
        let mut fields = BillFields::default();
        for (key, value) in raw {
            let Some(name) = FieldName::from_key(key) else {
                fields.extras.insert(key.clone(), value.clone());
                continue;
            };
            if value.is_null() || fields.is_present(name) {
                continue;
            }
            match name {
                FieldName::AccountNumber => fields.account_number = parse_text(value),
                FieldName::UsageAmount => fields.usage_amount = parse_number(value),
                FieldName::UsageUnit => fields.usage_unit = parse_unit(value),
                FieldName::BillingPeriodStart => fields.billing_period_start = parse_date(value),
                FieldName::BillingPeriodEnd => fields.billing_period_end = parse_date(value),
                FieldName::Rate => fields.rate = parse_number(value),
                FieldName::TotalCost => fields.total_cost = parse_number(value),
                FieldName::RegionCode => fields.region_code = parse_region(value),
            }
        }
        fields
    }

    pub fn is_present(&self, name: FieldName) -> bool {
        match name {
            FieldName::AccountNumber => self.account_number.is_present(),
            FieldName::UsageAmount => self.usage_amount.is_present(),
            FieldName::UsageUnit => self.usage_unit.is_present(),
            FieldName::BillingPeriodStart => self.billing_period_start.is_present(),
            FieldName::BillingPeriodEnd => self.billing_period_end.is_present(),
            FieldName::Rate => self.rate.is_present(),
            FieldName::TotalCost => self.total_cost.is_present(),
            FieldName::RegionCode => self.region_code.is_present(),
        }
    }

    pub fn is_malformed(&self, name: FieldName) -> bool {
        match name {
            FieldName::AccountNumber => self.account_number.is_malformed(),
            FieldName::UsageAmount => self.usage_amount.is_malformed(),
            FieldName::UsageUnit => self.usage_unit.is_malformed(),
            FieldName::BillingPeriodStart => self.billing_period_start.is_malformed(),
            FieldName::BillingPeriodEnd => self.billing_period_end.is_malformed(),
            FieldName::Rate => self.rate.is_malformed(),
            FieldName::TotalCost => self.total_cost.is_malformed(),
            FieldName::RegionCode => self.region_code.is_malformed(),
        }
    }

    /// Parsed value of a numeric field.
    pub fn number(&self, name: FieldName) -> Option<f64> {
        match name {
            FieldName::UsageAmount => self.usage_amount.value().copied(),
            FieldName::Rate => self.rate.value().copied(),
            FieldName::TotalCost => self.total_cost.value().copied(),
            _ => None,
        }
    }

    fn unit_factor(&self) -> f64 {
        self.usage_unit
            .value()
            .map(UsageUnit::normalization_factor)
            .unwrap_or(1.0)
    }

    /// Usage in range units (MWh scaled to kWh).
    pub fn normalized_usage(&self) -> Option<f64> {
        self.usage_amount.value().map(|u| u * self.unit_factor())
    }

    /// Rate per range unit (per-MWh rates scaled to per-kWh).
    pub fn normalized_rate(&self) -> Option<f64> {
        self.rate.value().map(|r| r / self.unit_factor())
    }

    /// `total_cost / usage_amount`, in the bill's own unit, for a bill that
    /// states no rate at all. `None` whenever a rate slot is present.
    pub fn derived_rate(&self) -> Option<f64> {
        if self.rate.is_present() {
            return None;
        }
        let usage = *self.usage_amount.value()?;
        let total = *self.total_cost.value()?;
        (usage > 0.0).then(|| total / usage)
    }

    /// Stated rate, falling back to the derived one.
    pub fn effective_rate(&self) -> Option<f64> {
        self.rate.value().copied().or_else(|| self.derived_rate())
    }

    /// `effective_rate` per range unit.
    pub fn normalized_effective_rate(&self) -> Option<f64> {
        self.effective_rate().map(|r| r / self.unit_factor())
    }
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*[$€£]?\s*(-?\d[\d,]*(?:\.\d+)?|-?\.\d+)\s*[A-Za-z/%¢ ]*$")
            .expect("valid number regex")
    })
}

/// Accepts JSON numbers and strings like "$1,234.50" or "850 kWh".
pub fn parse_number(value: &Value) -> Field<f64> {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() => Field::Parsed(f),
            _ => Field::Malformed(value.clone()),
        },
        Value::String(s) if s.trim().is_empty() => Field::Missing,
        Value::String(s) => number_pattern()
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
            .filter(|f| f.is_finite())
            .map(Field::Parsed)
            .unwrap_or_else(|| Field::Malformed(value.clone())),
        _ => Field::Malformed(value.clone()),
    }
}

/// Accepts YYYY-MM-DD, YYYY/MM/DD, MM/DD/YYYY and MM/DD/YY.
pub fn parse_date(value: &Value) -> Field<NaiveDate> {
    let Value::String(s) = value else {
        return Field::Malformed(value.clone());
    };
    let s = s.trim();
    if s.is_empty() {
        return Field::Missing;
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Field::Parsed(d);
        }
    }
    // %Y would happily read "24" as the year 24, so pick by length.
    let fmt = match s.rsplit('/').next().map(str::len) {
        Some(4) => "%m/%d/%Y",
        Some(2) => "%m/%d/%y",
        _ => return Field::Malformed(value.clone()),
    };
    NaiveDate::parse_from_str(s, fmt)
        .map(Field::Parsed)
        .unwrap_or_else(|_| Field::Malformed(value.clone()))
}

fn parse_text(value: &Value) -> Field<String> {
    match value {
        Value::String(s) if s.trim().is_empty() => Field::Missing,
        Value::String(s) => Field::Parsed(s.trim().to_string()),
        Value::Number(n) => Field::Parsed(n.to_string()),
        _ => Field::Malformed(value.clone()),
    }
}

fn parse_unit(value: &Value) -> Field<UsageUnit> {
    match value {
        Value::String(s) => UsageUnit::parse(s)
            .map(Field::Parsed)
            .unwrap_or(Field::Missing),
        _ => Field::Malformed(value.clone()),
    }
}

fn parse_region(value: &Value) -> Field<String> {
    match parse_text(value) {
        Field::Parsed(s)
            if s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
        {
            Field::Parsed(s.to_ascii_uppercase())
        }
        Field::Parsed(_) => Field::Malformed(value.clone()),
        other => other,
    }
}
