use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use auditor_core::error::BackendError;
use auditor_core::traits::Embedder;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embeddings from a local Ollama runtime (`POST /api/embeddings`).
///
/// The configured dimension is checked against every returned vector so a
/// model swap behind the same name surfaces as an error instead of silently
/// mixing embedding spaces.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dim: usize,
    id: String,
}

impl OllamaEmbedder {
    pub fn new(host: &str, model: &str, dim: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: format!("{}/api/embeddings", host.trim_end_matches('/')),
            model: model.to_string(),
            dim,
            id: format!("ollama:{model}:d{dim}"),
        })
    }
}

pub(crate) fn check_dim(vector: Vec<f32>, dim: usize) -> Result<Vec<f32>, BackendError> {
    if vector.len() != dim {
        return Err(BackendError::Malformed(format!(
            "expected {dim}-dimensional embedding, got {}",
            vector.len()
        )));
    }
    Ok(vector)
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(&EmbeddingRequest { model: &self.model, prompt: text })
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!("HTTP {status}: {body}")));
        }
        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| BackendError::Malformed(e.to_string()))?;
        check_dim(parsed.embedding, self.dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_dimension() {
        assert!(check_dim(vec![0.0; 3], 3).is_ok());
        assert!(matches!(check_dim(vec![0.0; 4], 3), Err(BackendError::Malformed(_))));
    }

    #[test]
    fn response_shape_parses() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"embedding":[0.1,0.2]}"#).expect("parse");
        assert_eq!(parsed.embedding.len(), 2);
    }

    #[test]
    fn provider_id_names_model_and_dim() {
        let e = OllamaEmbedder::new("http://localhost:11434/", "nomic-embed-text", 768).expect("client");
        assert_eq!(e.provider_id(), "ollama:nomic-embed-text:d768");
        assert_eq!(e.url, "http://localhost:11434/api/embeddings");
    }
}
