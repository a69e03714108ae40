//! Policy index: build, persist, query and swap.
//!
//! Typical flow:
//! 1) `PolicyIndexer::build` parses the ruleset and embeds one chunk per rule paragraph
//! 2) `store::save` writes the index atomically; `store::load` reads it back
//! 3) `Retriever::query` ranks chunks by cosine similarity against a query text
//! 4) `IndexHandle::rebuild` replaces the served generation in one swap

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use auditor_core::error::{Error, Result};
use auditor_core::types::PolicyChunk;

pub mod build;
pub mod handle;
pub mod search;
pub mod store;

pub use build::PolicyIndexer;
pub use handle::{IndexHandle, IndexSnapshot};
pub use search::{rank, Retriever};

pub const FORMAT_VERSION: u32 = 1;

/// Provenance recorded alongside the chunks; `provider_id` and `dim` are
/// checked against the query-time embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    pub provider_id: String,
    pub dim: usize,
    pub built_at: DateTime<Utc>,
    pub source_digest: String,
}

/// Immutable, ordered collection of policy chunks with a flat
/// nearest-neighbour structure (precomputed vector norms).
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    meta: IndexMeta,
    chunks: Vec<PolicyChunk>,
    norms: Vec<f32>,
}

impl Index {
    pub fn new(meta: IndexMeta, chunks: Vec<PolicyChunk>) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::Retrieval("index contains no chunks".to_string()));
        }
        let mut norms = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if chunk.embedding.len() != meta.dim {
                return Err(Error::Retrieval(format!(
                    "chunk {} has {} dimensions, index declares {}",
                    chunk.chunk_id,
                    chunk.embedding.len(),
                    meta.dim
                )));
            }
            if chunk.embedding.iter().any(|x| !x.is_finite()) {
                return Err(Error::Retrieval(format!("chunk {} has non-finite values", chunk.chunk_id)));
            }
            norms.push(l2_norm(&chunk.embedding));
        }
        Ok(Self { meta, chunks, norms })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn chunks(&self) -> &[PolicyChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub(crate) fn norms(&self) -> &[f32] {
        &self.norms
    }
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
