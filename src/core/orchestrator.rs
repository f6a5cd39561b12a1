// src/core/orchestrator.rs — Tier escalation controller
//
// Drives one document through the configured tiers as an explicit state
// machine. Retry and escalate are both transitions, so each is testable
// on its own through the pure helpers at the bottom of this file.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::cost::CostLedgerEntry;
use super::fields::BillFields;
use super::scorer::ConfidenceScorer;
use super::session::ExtractionSession;
use super::types::*;
use super::validation::ValidationEngine;
use crate::audit::{AuditRecord, AuditTrail};
use crate::infra::config::{Config, TiersConfig};
use crate::tier::retry::RetryPolicy;
use crate::tier::{TierFailure, TierOutput, TierRegistry};

/// Where one document's escalation stands.
#[derive(Debug, Clone, PartialEq)]
pub enum DocState {
    Pending,
    /// About to make call number `call` (1-based) to `tier_order[index]`.
    Invoking { index: usize, call: u32 },
    /// Waiting before call number `call` to the same tier.
    BackingOff {
        index: usize,
        call: u32,
        delay: Duration,
    },
    /// The attempt for `tier_order[index]` is on the path; decide what's next.
    Evaluated { index: usize },
    Finished(Status),
}

/// Lifecycle notifications for progress reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    TierSkipped {
        tier: Tier,
        reason: String,
    },
    TierInvoked {
        tier: Tier,
        call: u32,
    },
    Retrying {
        tier: Tier,
        call: u32,
        delay: Duration,
    },
    TierEvaluated {
        tier: Tier,
        confidence: Option<f64>,
        accepted: bool,
    },
    Finished {
        document_hash: String,
        status: Status,
    },
}

type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// The central orchestrator. Shared by all documents of a batch; all
/// mutable state lives in the `ExtractionSession` passed to `process`.
pub struct Orchestrator {
    registry: TierRegistry,
    audit: Arc<dyn AuditTrail>,
    scorer: ConfidenceScorer,
    validator: ValidationEngine,
    retry: RetryPolicy,
    tier_order: Vec<Tier>,
    tiers: TiersConfig,
    confidence_threshold: f64,
    cost_cap: Option<f64>,
    document_timeout: Duration,
    on_progress: Option<ProgressCallback>,
}

/// What one `Invoking` step produced.
enum CallOutcome {
    Output(TierOutput),
    Failed(TierFailure),
    TimedOut,
}

impl Orchestrator {
    pub fn new(config: &Config, registry: TierRegistry, audit: Arc<dyn AuditTrail>) -> Self {
        Self {
            registry,
            audit,
            scorer: ConfidenceScorer::from_config(config),
            validator: ValidationEngine::from_config(config),
            retry: RetryPolicy::from_settings(&config.retry),
            tier_order: config.pipeline.tier_order.clone(),
            tiers: config.tiers.clone(),
            confidence_threshold: config.pipeline.confidence_threshold,
            cost_cap: config.pipeline.cost_cap,
            document_timeout: Duration::from_secs(config.pipeline.document_timeout_secs),
            on_progress: None,
        }
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    /// Override the per-document deadline.
    pub fn with_document_timeout(mut self, timeout: Duration) -> Self {
        self.document_timeout = timeout;
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    pub fn tier_order(&self) -> &[Tier] {
        &self.tier_order
    }

    /// Run one document through the tiers. Never fails: every outcome,
    /// including rejection and timeout, is reported through `status`.
    pub async fn process(&self, document: Document, session: &ExtractionSession) -> ExtractionResult {
        let started_at = Utc::now();
        let hash = document.hash().to_string();

        let input_issues = self.validator.check_input(&document);
        if !input_issues.is_empty() {
            tracing::warn!(
                document = %short_hash(&hash),
                issues = input_issues.len(),
                "Document rejected before extraction"
            );
            let result = ExtractionResult::input_rejected(&hash, input_issues);
            self.finish(&result, Vec::new(), session, started_at);
            return result;
        }

        let deadline = Instant::now() + self.document_timeout;
        let mut path: Vec<ExtractionAttempt> = Vec::new();
        let mut notes: Vec<ValidationIssue> = Vec::new();
        let mut charges: Vec<CostLedgerEntry> = Vec::new();
        let mut reservation = None;
        let mut tier_start = Instant::now();
        let mut state = DocState::Pending;

        let status = loop {
            state = match state {
                DocState::Pending if self.tier_order.is_empty() => {
                    DocState::Finished(exhausted_status(&path))
                }
                DocState::Pending => DocState::Invoking { index: 0, call: 1 },

                DocState::Invoking { index, call } => {
                    let tier = self.tier_order[index];

                    if call == 1 {
                        tier_start = Instant::now();

                        let check = self.check_available(tier);
                        let Ok(available) = tokio::time::timeout_at(deadline, check).await else {
                            let elapsed = elapsed_ms(tier_start);
                            tracing::warn!(
                                tier = %tier,
                                elapsed_ms = elapsed,
                                "Document deadline reached during availability check"
                            );
                            path.push(ExtractionAttempt::failed(
                                tier,
                                AttemptError::Timeout {
                                    elapsed_ms: elapsed,
                                },
                                0.0,
                                elapsed,
                                0,
                            ));
                            state = DocState::Finished(Status::Timeout);
                            continue;
                        };
                        if let Err(reason) = available {
                            tracing::warn!(tier = %tier, %reason, "Tier unavailable, skipping");
                            self.emit(ProgressEvent::TierSkipped {
                                tier,
                                reason: reason.clone(),
                            });
                            charges.push(session.ledger().skip(tier, Some(&hash)));
                            path.push(ExtractionAttempt::failed(
                                tier,
                                AttemptError::TierUnavailable { reason },
                                0.0,
                                0,
                                0,
                            ));
                            state = DocState::Evaluated { index };
                            continue;
                        }

                        match session.ledger().try_reserve(tier, self.cost_cap) {
                            Ok(r) => reservation = Some(r),
                            Err(limit) => {
                                tracing::info!(
                                    tier = %tier,
                                    session_total = session.ledger().session_total(),
                                    "Cost cap reached, stopping escalation: {}",
                                    limit
                                );
                                notes.push(
                                    ValidationIssue::warning(
                                        None,
                                        "cost.limit_exceeded",
                                        format!("{tier} not invoked: {limit}"),
                                    )
                                    .with_tier(tier),
                                );
                                path.push(ExtractionAttempt::failed(tier, limit, 0.0, 0, 0));
                                state = DocState::Finished(Status::CostLimited);
                                continue;
                            }
                        }
                    }

                    self.emit(ProgressEvent::TierInvoked { tier, call });
                    tracing::debug!(tier = %tier, call, "Invoking tier");

                    match self.call_tier(tier, &document, deadline).await {
                        CallOutcome::Output(output) => {
                            let charge = reservation
                                .take()
                                .map(|r| session.ledger().settle(r, output.cost, Some(&hash)));
                            let cost = charge.as_ref().map(|c| c.cost).unwrap_or(0.0);
                            charges.extend(charge);
                            let latency = output.latency.unwrap_or_else(|| tier_start.elapsed());
                            path.push(self.evaluate(tier, output, cost, latency, call, session));
                            DocState::Evaluated { index }
                        }
                        CallOutcome::Failed(failure) => {
                            let max_calls = self.tiers.max_attempts(tier);
                            if self.retry.should_retry(tier, &failure, call, max_calls) {
                                let delay = self
                                    .retry
                                    .delay_for_attempt(call - 1, failure.retry_after());
                                tracing::warn!(
                                    tier = %tier,
                                    call,
                                    max_calls,
                                    delay_ms = delay.as_millis() as u64,
                                    "Retrying after error: {}",
                                    failure
                                );
                                DocState::BackingOff {
                                    index,
                                    call: call + 1,
                                    delay,
                                }
                            } else {
                                let (error, charge) = match failure {
                                    TierFailure::Unavailable(reason) => (
                                        AttemptError::TierUnavailable { reason },
                                        reservation
                                            .take()
                                            .map(|r| session.ledger().release(r, Some(&hash))),
                                    ),
                                    TierFailure::Transient { message, .. } => (
                                        AttemptError::TierTransientFailure {
                                            message,
                                            calls: call,
                                        },
                                        reservation
                                            .take()
                                            .map(|r| session.ledger().settle(r, None, Some(&hash))),
                                    ),
                                    TierFailure::Rejected(message) => (
                                        AttemptError::TierRejected { message },
                                        reservation
                                            .take()
                                            .map(|r| session.ledger().settle(r, None, Some(&hash))),
                                    ),
                                };
                                tracing::warn!(tier = %tier, calls = call, "Tier failed: {}", error);
                                let cost = charge.as_ref().map(|c| c.cost).unwrap_or(0.0);
                                charges.extend(charge);
                                path.push(ExtractionAttempt::failed(
                                    tier,
                                    error,
                                    cost,
                                    elapsed_ms(tier_start),
                                    call,
                                ));
                                DocState::Evaluated { index }
                            }
                        }
                        CallOutcome::TimedOut => {
                            let charge = reservation
                                .take()
                                .map(|r| session.ledger().settle(r, None, Some(&hash)));
                            let cost = charge.as_ref().map(|c| c.cost).unwrap_or(0.0);
                            charges.extend(charge);
                            let elapsed = elapsed_ms(tier_start);
                            tracing::warn!(
                                tier = %tier,
                                elapsed_ms = elapsed,
                                "Document deadline reached, cancelling tier call"
                            );
                            path.push(ExtractionAttempt::failed(
                                tier,
                                AttemptError::Timeout {
                                    elapsed_ms: elapsed,
                                },
                                cost,
                                elapsed,
                                call,
                            ));
                            DocState::Finished(Status::Timeout)
                        }
                    }
                }

                DocState::BackingOff { index, call, delay } => {
                    let tier = self.tier_order[index];
                    self.emit(ProgressEvent::Retrying { tier, call, delay });
                    if Instant::now() + delay >= deadline {
                        tokio::time::sleep_until(deadline).await;
                        let charge = reservation
                            .take()
                            .map(|r| session.ledger().settle(r, None, Some(&hash)));
                        let cost = charge.as_ref().map(|c| c.cost).unwrap_or(0.0);
                        charges.extend(charge);
                        let elapsed = elapsed_ms(tier_start);
                        tracing::warn!(tier = %tier, "Document deadline reached during backoff");
                        path.push(ExtractionAttempt::failed(
                            tier,
                            AttemptError::Timeout {
                                elapsed_ms: elapsed,
                            },
                            cost,
                            elapsed,
                            call - 1,
                        ));
                        DocState::Finished(Status::Timeout)
                    } else {
                        tokio::time::sleep(delay).await;
                        DocState::Invoking { index, call }
                    }
                }

                DocState::Evaluated { index } => {
                    let next = match path.last() {
                        Some(attempt) => {
                            next_state(attempt, index, self.tier_order.len(), self.confidence_threshold)
                        }
                        None => DocState::Finished(exhausted_status(&path)),
                    };
                    let next = match next {
                        DocState::Finished(Status::LowConfidenceUnverified) => {
                            DocState::Finished(exhausted_status(&path))
                        }
                        other => other,
                    };
                    if let Some(attempt) = path.last() {
                        let accepted = next == DocState::Finished(Status::Accepted);
                        self.emit(ProgressEvent::TierEvaluated {
                            tier: attempt.tier,
                            confidence: attempt.confidence,
                            accepted,
                        });
                        if accepted {
                            tracing::info!(
                                tier = %attempt.tier,
                                confidence = attempt.confidence.unwrap_or(0.0),
                                cost = attempt.cost,
                                "Attempt accepted"
                            );
                        } else if let DocState::Invoking { index: next, .. } = next {
                            tracing::info!(
                                from = %attempt.tier,
                                to = %self.tier_order[next],
                                confidence = attempt.confidence.unwrap_or(0.0),
                                "Escalating"
                            );
                        }
                    }
                    next
                }

                DocState::Finished(status) => break status,
            };
        };

        let chosen = choose_attempt(&path, status);
        let result = ExtractionResult::new(&hash, path, chosen, notes, status);
        tracing::info!(
            document = %short_hash(&hash),
            status = %result.status,
            tiers = result.escalation_path.len(),
            confidence = result.final_confidence.unwrap_or(0.0),
            cost = result.total_cost(),
            "Document processed"
        );
        self.finish(&result, charges, session, started_at);
        result
    }

    async fn check_available(&self, tier: Tier) -> Result<(), String> {
        if !self.tiers.get(tier).enabled {
            return Err("disabled in config".into());
        }
        let adapter = self.registry.get(tier).map_err(|e| e.to_string())?;
        adapter.is_available().await
    }

    /// One adapter call, bounded by the document deadline.
    async fn call_tier(&self, tier: Tier, document: &Document, deadline: Instant) -> CallOutcome {
        let adapter = match self.registry.get(tier) {
            Ok(adapter) => adapter.clone(),
            Err(e) => return CallOutcome::Failed(TierFailure::Unavailable(e.to_string())),
        };
        let call = adapter.extract(document.bytes(), document.media_type());
        match tokio::time::timeout_at(deadline, call).await {
            Ok(Ok(output)) => CallOutcome::Output(output),
            Ok(Err(failure)) => CallOutcome::Failed(failure),
            Err(_) => CallOutcome::TimedOut,
        }
    }

    /// Turn adapter output into a scored, validated attempt.
    fn evaluate(
        &self,
        tier: Tier,
        output: TierOutput,
        cost: f64,
        latency: Duration,
        calls: u32,
        session: &ExtractionSession,
    ) -> ExtractionAttempt {
        let fields = BillFields::from_raw(&output.fields);
        let checked = self.validator.check_attempt(
            tier,
            &fields,
            output.raw_text.as_deref(),
            session.seen_usage(tier),
        );

        let mut attempt = ExtractionAttempt {
            tier,
            fields,
            raw_confidence: output.confidence,
            confidence: None,
            raw_text: output.raw_text,
            evidence: checked.evidence,
            cost,
            latency_ms: latency.as_millis() as u64,
            calls,
            issues: checked.issues,
            error: None,
        };
        attempt.confidence = self.scorer.score(&attempt);

        if !attempt.has_error_issue() {
            if let Some(usage) = attempt.fields.normalized_usage() {
                session.observe_usage(tier, usage);
            }
        }

        tracing::debug!(
            tier = %tier,
            confidence = attempt.confidence.unwrap_or(0.0),
            issues = attempt.issues.len(),
            cost,
            "Attempt scored"
        );
        attempt
    }

    /// Append the audit record. Failures are logged, never propagated.
    fn finish(
        &self,
        result: &ExtractionResult,
        charges: Vec<CostLedgerEntry>,
        session: &ExtractionSession,
        started_at: chrono::DateTime<Utc>,
    ) {
        self.emit(ProgressEvent::Finished {
            document_hash: result.document_hash.clone(),
            status: result.status,
        });
        let record = AuditRecord::new(session.id(), result.clone(), charges, started_at);
        if let Err(e) = self.audit.append(record) {
            tracing::error!(
                document = %short_hash(&result.document_hash),
                "Failed to append audit record: {}",
                e
            );
        }
    }
}

// ─── Transitions ────────────────────────────────────────────

/// Decision after an attempt lands on the path: accept, escalate to the
/// next tier, or stop with the tiers exhausted.
pub fn next_state(attempt: &ExtractionAttempt, index: usize, tier_count: usize, threshold: f64) -> DocState {
    if attempt.is_acceptable(threshold) {
        DocState::Finished(Status::Accepted)
    } else if index + 1 < tier_count {
        DocState::Invoking {
            index: index + 1,
            call: 1,
        }
    } else {
        DocState::Finished(Status::LowConfidenceUnverified)
    }
}

/// Status when no attempt was accepted and no tier is left.
pub fn exhausted_status(path: &[ExtractionAttempt]) -> Status {
    if path.iter().all(ExtractionAttempt::is_unavailable) {
        Status::NoTierAvailable
    } else {
        Status::LowConfidenceUnverified
    }
}

/// Index of the attempt to report. The accepted attempt is always the
/// last on the path; otherwise the highest confidence wins, ties going
/// to the earlier (cheaper) tier.
pub fn choose_attempt(path: &[ExtractionAttempt], status: Status) -> Option<usize> {
    if status == Status::Accepted {
        return path.len().checked_sub(1);
    }
    let mut best: Option<(usize, f64)> = None;
    for (i, attempt) in path.iter().enumerate() {
        let Some(confidence) = attempt.confidence else {
            continue;
        };
        if best.map_or(true, |(_, b)| confidence > b) {
            best = Some((i, confidence));
        }
    }
    best.map(|(i, _)| i)
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(tier: Tier, confidence: f64) -> ExtractionAttempt {
        let mut a = ExtractionAttempt::failed(
            tier,
            AttemptError::TierRejected {
                message: String::new(),
            },
            0.0,
            0,
            1,
        );
        a.error = None;
        a.confidence = Some(confidence);
        a
    }

    fn unavailable(tier: Tier) -> ExtractionAttempt {
        ExtractionAttempt::failed(
            tier,
            AttemptError::TierUnavailable {
                reason: "missing".into(),
            },
            0.0,
            0,
            0,
        )
    }

    #[test]
    fn test_accept_above_threshold() {
        let a = scored(Tier::StructuredText, 0.8);
        assert_eq!(next_state(&a, 0, 3, 0.7), DocState::Finished(Status::Accepted));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let a = scored(Tier::StructuredText, 0.7);
        assert_eq!(next_state(&a, 0, 3, 0.7), DocState::Finished(Status::Accepted));
    }

    #[test]
    fn test_escalate_below_threshold() {
        let a = scored(Tier::StructuredText, 0.5);
        assert_eq!(
            next_state(&a, 0, 3, 0.7),
            DocState::Invoking { index: 1, call: 1 }
        );
    }

    #[test]
    fn test_error_issue_blocks_acceptance() {
        let mut a = scored(Tier::HostedVision, 0.95);
        a.issues.push(ValidationIssue::error(
            None,
            "evidence.unanchored",
            "possible hallucination",
        ));
        assert_eq!(
            next_state(&a, 2, 3, 0.7),
            DocState::Finished(Status::LowConfidenceUnverified)
        );
    }

    #[test]
    fn test_exhausted_status() {
        assert_eq!(
            exhausted_status(&[unavailable(Tier::Ocr), unavailable(Tier::HostedVision)]),
            Status::NoTierAvailable
        );
        assert_eq!(
            exhausted_status(&[unavailable(Tier::Ocr), scored(Tier::HostedVision, 0.2)]),
            Status::LowConfidenceUnverified
        );
    }

    #[test]
    fn test_choose_highest_confidence_earliest_on_tie() {
        let path = vec![
            scored(Tier::StructuredText, 0.6),
            unavailable(Tier::Ocr),
            scored(Tier::HostedVision, 0.6),
        ];
        assert_eq!(choose_attempt(&path, Status::LowConfidenceUnverified), Some(0));

        let path = vec![scored(Tier::StructuredText, 0.3), scored(Tier::Ocr, 0.55)];
        assert_eq!(choose_attempt(&path, Status::Timeout), Some(1));
    }

    #[test]
    fn test_choose_none_without_confidence() {
        let path = vec![unavailable(Tier::Ocr)];
        assert_eq!(choose_attempt(&path, Status::NoTierAvailable), None);
        assert_eq!(choose_attempt(&[], Status::CostLimited), None);
    }

    #[test]
    fn test_choose_accepted_is_last() {
        let path = vec![scored(Tier::StructuredText, 0.9), scored(Tier::Ocr, 0.8)];
        assert_eq!(choose_attempt(&path, Status::Accepted), Some(1));
    }
}
