//! The audit pipeline: normalize, retrieve, assemble, judge.
//!
//! Each stage runs strictly after the previous one and a failing stage ends
//! the request with a classified [`AuditResult::Failure`]. Requests share
//! only the read-only [`Index`], so any number may run concurrently; a worker
//! pool bounds how many reach the backends at once.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use auditor_core::config::{RetrievalSettings, Settings};
use auditor_core::error::Error;
use auditor_core::traits::{DocumentDecoder, Embedder, ReasoningBackend, VisionBackend};
use auditor_core::types::{AuditRequest, AuditResult, Stage};
use auditor_index::{Index, IndexHandle, Retriever};
use auditor_normalize::ModalityNormalizer;
use auditor_verdict::{ContextAssembler, VerdictEngine};

pub mod cancel;

pub use cancel::{cancel_pair, CancelSignal, Canceller};

/// Injected backends the pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn Embedder>,
    pub decoder: Arc<dyn DocumentDecoder>,
    pub vision: Arc<dyn VisionBackend>,
    pub reasoning: Arc<dyn ReasoningBackend>,
}

pub struct Orchestrator {
    normalizer: ModalityNormalizer,
    retriever: Retriever,
    assembler: ContextAssembler,
    engine: VerdictEngine,
    retrieval: RetrievalSettings,
    workers: Semaphore,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: &Settings) -> Self {
        let Collaborators { embedder, decoder, vision, reasoning } = collaborators;
        Self {
            normalizer: ModalityNormalizer::new(decoder, vision, settings.vision.timeout()),
            retriever: Retriever::new(embedder, settings.embedding.timeout()),
            assembler: ContextAssembler::new(settings.context.budget_chars),
            engine: VerdictEngine::new(reasoning, settings.reasoning.timeout(), settings.verdict.clone()),
            retrieval: settings.retrieval.clone(),
            workers: Semaphore::new(settings.pipeline.max_concurrent_audits),
        }
    }

    pub async fn audit(&self, request: &AuditRequest, index: &Index) -> AuditResult {
        self.audit_with_cancel(request, index, &CancelSignal::never()).await
    }

    /// Audit against whatever generation `handle` serves right now. The
    /// snapshot is held for the whole request, so a concurrent rebuild does
    /// not affect it.
    pub async fn audit_current(&self, request: &AuditRequest, handle: &IndexHandle) -> AuditResult {
        let snapshot = handle.snapshot();
        debug!(generation = snapshot.generation, "auditing against index generation");
        self.audit(request, &snapshot.index).await
    }

    /// Audit every request concurrently (bounded by the worker pool). Results
    /// are returned in input order.
    pub async fn audit_many(&self, requests: &[AuditRequest], index: &Index) -> Vec<AuditResult> {
        join_all(requests.iter().map(|r| self.audit(r, index))).await
    }

    pub async fn audit_with_cancel(&self, request: &AuditRequest, index: &Index, cancel: &CancelSignal) -> AuditResult {
        let modality = request.modality();

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(Stage::Admission),
            permit = self.workers.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return cancelled(Stage::Admission),
            },
        };

        let canonical = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(Stage::Normalization),
            result = self.normalizer.normalize(request) => match result {
                Ok(canonical) => canonical,
                Err(e) => return failed(Stage::Normalization, &e),
            },
        };

        let retrieval = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(Stage::Retrieval),
            result = self.retriever.query(index, &canonical.normalized_text, self.retrieval.k, self.retrieval.min_similarity) => match result {
                Ok(retrieval) => retrieval,
                Err(e) => return failed(Stage::Retrieval, &e),
            },
        };

        let ctx = self.assembler.assemble(&canonical, &retrieval);

        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(Stage::Verdict),
            verdict = self.engine.evaluate(&ctx) => verdict,
        };

        info!(
            ?modality,
            subject = ?request.subject,
            retrieved = retrieval.len(),
            in_context = ctx.chunks.len(),
            outcome = ?verdict.outcome,
            "audit complete"
        );
        AuditResult::Verdict(verdict)
    }
}

fn failed(stage: Stage, error: &Error) -> AuditResult {
    warn!(?stage, kind = ?error.kind(), error = %error, "audit failed");
    AuditResult::failure(stage, error)
}

fn cancelled(stage: Stage) -> AuditResult {
    info!(?stage, "audit cancelled");
    AuditResult::failure(stage, &Error::Cancelled)
}
