// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// The per-attempt hot path: field mapping, scoring, post-extraction
// validation and evidence anchoring against a page of bill text.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Map, Value};

use billwise::core::fields::BillFields;
use billwise::core::scorer::ConfidenceScorer;
use billwise::core::types::{AttemptError, ExtractionAttempt, Tier};
use billwise::core::validation::{locate_evidence, ValidationEngine};
use billwise::infra::config::Config;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn raw_fields() -> Map<String, Value> {
    json!({
        "account_number": "8812-44",
        "total_usage": "1,254",
        "unit": "kilowatt hours",
        "rate_per_kwh": "$0.12",
        "amount_due": "$150.48",
        "service_start_date": "03/01/2024",
        "service_end_date": "03/31/2024",
        "region": "CAMX",
        "meter_id": "M-77"
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// A long statement with the extracted numbers buried near the end.
fn bill_text() -> String {
    let mut text = String::new();
    for i in 0..200 {
        text.push_str(&format!("Line {i}: adjustment {}.{:02} applied\n", i * 3, i % 100));
    }
    text.push_str("Total Usage: 1,254 kWh\nRate: $0.12/kWh\nAmount Due: $150.48\n");
    text
}

fn attempt(fields: BillFields) -> ExtractionAttempt {
    let mut a = ExtractionAttempt::failed(
        Tier::HostedVision,
        AttemptError::TierRejected {
            message: String::new(),
        },
        0.0,
        0,
        1,
    );
    a.error = None;
    a.fields = fields;
    a.raw_confidence = Some(0.9);
    a
}

// ─── Benchmarks ─────────────────────────────────────────────────────────────

fn bench_field_mapping(c: &mut Criterion) {
    let raw = raw_fields();
    c.bench_function("fields_from_raw", |b| {
        b.iter(|| BillFields::from_raw(black_box(&raw)))
    });
}

fn bench_scoring(c: &mut Criterion) {
    let scorer = ConfidenceScorer::from_config(&Config::default());
    let a = attempt(BillFields::from_raw(&raw_fields()));
    c.bench_function("score_attempt", |b| b.iter(|| scorer.score(black_box(&a))));
}

fn bench_validation(c: &mut Criterion) {
    let engine = ValidationEngine::from_config(&Config::default());
    let fields = BillFields::from_raw(&raw_fields());
    let text = bill_text();
    c.bench_function("check_attempt_hosted", |b| {
        b.iter(|| {
            engine.check_attempt(
                Tier::HostedVision,
                black_box(&fields),
                Some(black_box(text.as_str())),
                None,
            )
        })
    });
}

fn bench_evidence(c: &mut Criterion) {
    let fields = BillFields::from_raw(&raw_fields());
    let text = bill_text();
    c.bench_function("locate_evidence_200_lines", |b| {
        b.iter(|| locate_evidence(black_box(&fields), black_box(&text), 0.005))
    });
}

criterion_group!(
    benches,
    bench_field_mapping,
    bench_scoring,
    bench_validation,
    bench_evidence
);
criterion_main!(benches);
