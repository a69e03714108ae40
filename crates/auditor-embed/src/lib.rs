//! Embedding providers.
//!
//! `OllamaEmbedder` calls a local Ollama runtime; `FakeEmbedder` is a
//! deterministic hashing embedder for tests and offline development,
//! selected with `embedding.provider = "fake"` or `APP_USE_FAKE_EMBEDDINGS=1`.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use twox_hash::XxHash64;

use auditor_core::config::{EmbeddingProviderKind, Settings};
use auditor_core::error::BackendError;
use auditor_core::traits::Embedder;

mod ollama;

pub use ollama::OllamaEmbedder;

pub struct FakeEmbedder {
    dim: usize,
    id: String,
}

impl FakeEmbedder {
    /// `dim` is clamped to at least 1.
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("fake:xxhash:d{dim}") }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(self.embed_sync(text))
    }
}

fn fake_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Build the embedder selected by the settings.
pub fn get_default_embedder(settings: &Settings) -> anyhow::Result<Arc<dyn Embedder>> {
    if fake_forced() || settings.embedding.provider == EmbeddingProviderKind::Fake {
        tracing::info!(dim = settings.embedding.dim, "using FakeEmbedder");
        return Ok(Arc::new(FakeEmbedder::new(settings.embedding.dim)));
    }
    let embedder = OllamaEmbedder::new(
        &settings.ollama.host,
        &settings.embedding.model,
        settings.embedding.dim,
    )?;
    tracing::info!(provider = embedder.provider_id(), "using Ollama embeddings");
    Ok(Arc::new(embedder))
}
