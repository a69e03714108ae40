use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use auditor_core::error::{Error, Result};
use auditor_core::policy::compare_rule_ids;
use auditor_core::traits::{with_timeout, Embedder};
use auditor_core::types::{RetrievalResult, ScoredChunk};

use crate::{l2_norm, Index};

/// Embeds query text with the same provider the index was built with and
/// returns the nearest policy chunks.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    pub async fn query(&self, index: &Index, text: &str, k: usize, min_similarity: f32) -> Result<RetrievalResult> {
        if index.is_empty() {
            return Err(Error::Retrieval("index is empty".to_string()));
        }
        let meta = index.meta();
        if meta.provider_id != self.embedder.provider_id() || meta.dim != self.embedder.dim() {
            return Err(Error::EmbeddingBackend(format!(
                "index built with {} (d={}), query embedder is {} (d={})",
                meta.provider_id,
                meta.dim,
                self.embedder.provider_id(),
                self.embedder.dim()
            )));
        }
        if text.trim().is_empty() {
            return Err(Error::Retrieval("query text is empty".to_string()));
        }
        let query = with_timeout(self.timeout, self.embedder.embed(text))
            .await
            .map_err(|e| Error::EmbeddingBackend(e.to_string()))?;
        if query.len() != meta.dim {
            return Err(Error::EmbeddingBackend(format!(
                "query embedding has {} dimensions, index expects {}",
                query.len(),
                meta.dim
            )));
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(Error::EmbeddingBackend("query embedding has non-finite values".to_string()));
        }
        let hits = rank(index, &query, k, min_similarity);
        debug!(k, hits = hits.len(), "retrieved policy chunks");
        Ok(RetrievalResult { hits })
    }
}

/// Exhaustive cosine ranking: score descending, ties by rule id (numeric
/// order) then chunk id. Chunks below `min_similarity` are dropped.
pub fn rank(index: &Index, query: &[f32], k: usize, min_similarity: f32) -> Vec<ScoredChunk> {
    let query_norm = l2_norm(query);
    let mut scored: Vec<(usize, f32)> = index
        .chunks()
        .iter()
        .zip(index.norms())
        .enumerate()
        .map(|(i, (chunk, norm))| (i, cosine(query, query_norm, &chunk.embedding, *norm)))
        .filter(|(_, score)| *score >= min_similarity)
        .collect();

    let chunks = index.chunks();
    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| compare_rule_ids(&chunks[a.0].rule_id, &chunks[b.0].rule_id))
            .then_with(|| chunks[a.0].chunk_id.cmp(&chunks[b.0].chunk_id))
    });
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(i, score)| ScoredChunk { chunk: chunks[i].clone(), score })
        .collect()
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let score = dot / (a_norm * b_norm);
    if score.is_finite() { score.clamp(-1.0, 1.0) } else { 0.0 }
}
