// src/core/batch.rs — Bounded batch processing

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::orchestrator::Orchestrator;
use super::session::ExtractionSession;
use super::types::{Document, ExtractionResult};

/// Runs many documents through one orchestrator and one session.
/// Documents run concurrently up to `max_concurrency`; each document's
/// own escalation stays sequential.
pub struct BatchProcessor {
    orchestrator: Arc<Orchestrator>,
    session: Arc<ExtractionSession>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl BatchProcessor {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        session: Arc<ExtractionSession>,
        max_concurrency: usize,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            orchestrator,
            session,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn session(&self) -> &Arc<ExtractionSession> {
        &self.session
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Process every document. Results come back in submission order.
    pub async fn run(&self, documents: Vec<Document>) -> Vec<ExtractionResult> {
        let total = documents.len();
        tracing::info!(
            documents = total,
            max_concurrency = self.max_concurrency,
            session = self.session.id(),
            "Starting batch"
        );

        let jobs = documents.into_iter().map(|document| {
            let permits = self.permits.clone();
            async move {
                // Never closed; if it were, the bound would simply lift.
                let _permit = permits.acquire_owned().await.ok();
                self.orchestrator.process(document, &self.session).await
            }
        });
        let results = join_all(jobs).await;

        tracing::info!(
            documents = total,
            accepted = results.iter().filter(|r| !r.status.needs_review()).count(),
            session_cost = self.session.ledger().session_total(),
            "Batch finished"
        );
        results
    }
}
