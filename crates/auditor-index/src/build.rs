use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use auditor_core::error::{Error, Result};
use auditor_core::policy::parse_policy;
use auditor_core::traits::{with_timeout, Embedder};
use auditor_core::types::PolicyChunk;

use crate::{l2_norm, Index, IndexMeta, FORMAT_VERSION};

/// Turns a policy source into an [`Index`]. A build either yields a
/// complete index or an error; partial indices are never returned.
/// Parse failures are [`Error::Ingestion`], embedder failures
/// [`Error::EmbeddingBackend`].
pub struct PolicyIndexer {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
    progress: ProgressBar,
}

impl PolicyIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout, progress: ProgressBar::hidden() }
    }

    /// Report per-chunk progress on `bar`; its length is set by `build`.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub async fn build_from_path(&self, path: &Path) -> Result<Index> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot read policy {}: {}", path.display(), e)))?;
        self.build(&source).await
    }

    pub async fn build(&self, source: &str) -> Result<Index> {
        let document = parse_policy(source)?;
        let drafts = document.chunk_drafts();
        let dim = self.embedder.dim();
        info!(
            rules = document.rule_count(),
            chunks = drafts.len(),
            provider = self.embedder.provider_id(),
            "building policy index"
        );

        self.progress.set_length(drafts.len() as u64);
        let mut chunks = Vec::with_capacity(drafts.len());
        for draft in drafts {
            self.progress.set_message(draft.rule_id.clone());
            let embedding = with_timeout(self.timeout, self.embedder.embed(&draft.text))
                .await
                .map_err(|e| Error::EmbeddingBackend(format!("embedding chunk {} failed: {}", draft.chunk_id, e)))?;
            if embedding.len() != dim {
                return Err(Error::EmbeddingBackend(format!(
                    "embedder returned {} dimensions for chunk {}, expected {}",
                    embedding.len(),
                    draft.chunk_id,
                    dim
                )));
            }
            if embedding.iter().any(|x| !x.is_finite()) {
                return Err(Error::EmbeddingBackend(format!("non-finite embedding for chunk {}", draft.chunk_id)));
            }
            if l2_norm(&embedding) == 0.0 {
                warn!(chunk = %draft.chunk_id, "zero embedding; chunk will never be retrieved");
            }
            debug!(chunk = %draft.chunk_id, rule = %draft.rule_id, "embedded");
            chunks.push(PolicyChunk {
                chunk_id: draft.chunk_id,
                rule_id: draft.rule_id,
                section_title: draft.section_title,
                text: draft.text,
                embedding,
            });
            self.progress.inc(1);
        }
        self.progress.finish_with_message("policy indexed");

        let meta = IndexMeta {
            format_version: FORMAT_VERSION,
            provider_id: self.embedder.provider_id().to_string(),
            dim,
            built_at: Utc::now(),
            source_digest: document.digest,
        };
        Index::new(meta, chunks).map_err(|e| Error::Ingestion(e.to_string()))
    }
}
