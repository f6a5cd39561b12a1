// tests/common/mod.rs — Scripted tier adapters shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use billwise::core::types::Tier;
use billwise::tier::{TierAdapter, TierFailure, TierOutput};

/// Text a hosted mock "saw"; contains every number of `full_fields()`.
pub const BILL_TEXT: &str =
    "ACME Power\nAccount 8812-44\nTotal Usage: 254 kWh\nRate: $0.12 per kWh\nAmount Due: $30.48";

pub fn full_fields() -> Value {
    serde_json::json!({"usage": 254, "unit": "kWh", "rate": 0.12, "total_cost": 30.48})
}

/// Successful adapter output with a fixed latency.
pub fn output(fields: Value, confidence: f64) -> TierOutput {
    TierOutput {
        fields: fields.as_object().cloned().unwrap_or_default(),
        confidence: Some(confidence),
        raw_text: None,
        cost: None,
        latency: Some(Duration::from_millis(7)),
    }
}

pub fn hosted_output(fields: Value, confidence: f64) -> TierOutput {
    TierOutput {
        raw_text: Some(BILL_TEXT.into()),
        ..output(fields, confidence)
    }
}

/// Replays a script of responses; the last one repeats once the script runs out.
pub struct MockAdapter {
    tier: Tier,
    script: Mutex<VecDeque<Result<TierOutput, TierFailure>>>,
    last: Mutex<Option<Result<TierOutput, TierFailure>>>,
    available: bool,
    delay: Option<Duration>,
    availability_delay: Option<Duration>,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAdapter {
    pub fn new(tier: Tier, script: Vec<Result<TierOutput, TierFailure>>) -> Self {
        Self {
            tier,
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            available: true,
            delay: None,
            availability_delay: None,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn returning(tier: Tier, output: TierOutput) -> Self {
        Self::new(tier, vec![Ok(output)])
    }

    pub fn failing(tier: Tier, failure: TierFailure) -> Self {
        Self::new(tier, vec![Err(failure)])
    }

    pub fn unavailable(tier: Tier) -> Self {
        Self {
            available: false,
            ..Self::new(tier, Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes `is_available` take this long, like a slow dependency probe.
    pub fn with_availability_delay(mut self, delay: Duration) -> Self {
        self.availability_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<TierOutput, TierFailure> {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(response) = next {
            *last = Some(response);
        }
        last.clone()
            .unwrap_or_else(|| Err(TierFailure::Rejected("empty script".into())))
    }
}

#[async_trait]
impl TierAdapter for MockAdapter {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn is_available(&self) -> Result<(), String> {
        if let Some(delay) = self.availability_delay {
            tokio::time::sleep(delay).await;
        }
        if self.available {
            Ok(())
        } else {
            Err("mock dependency missing".into())
        }
    }

    async fn extract(&self, _bytes: &[u8], _media_type: &str) -> Result<TierOutput, TierFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.next_response();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Arc handles kept by the test so call counts can be read after registration.
pub struct Mocks {
    pub text: Arc<MockAdapter>,
    pub ocr: Arc<MockAdapter>,
    pub hosted: Arc<MockAdapter>,
}

impl Mocks {
    pub fn new(text: MockAdapter, ocr: MockAdapter, hosted: MockAdapter) -> Self {
        Self {
            text: Arc::new(text),
            ocr: Arc::new(ocr),
            hosted: Arc::new(hosted),
        }
    }

    pub fn registry(&self) -> billwise::tier::TierRegistry {
        billwise::tier::TierRegistry::new()
            .with(self.text.clone())
            .with(self.ocr.clone())
            .with(self.hosted.clone())
    }

    pub fn total_calls(&self) -> u32 {
        self.text.calls() + self.ocr.calls() + self.hosted.calls()
    }
}
