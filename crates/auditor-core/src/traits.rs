//! Injected collaborator capabilities. The core never hard-codes a backend;
//! every model runtime or decoder is passed in behind one of these traits.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::{BackendError, DecodeError};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `ollama:nomic-embed-text`).
    fn provider_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait VisionBackend: Send + Sync {
    fn model_id(&self) -> &str;
    /// Describe `image` following `instruction`. Returns the raw backend text.
    async fn describe(&self, image: &[u8], instruction: &str) -> Result<String, BackendError>;
}

/// A single prompt sent to the text-reasoning backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningRequest {
    pub system: String,
    pub user: String,
    /// Ask the backend to constrain its output to JSON when it supports it.
    pub json_mode: bool,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn model_id(&self) -> &str;
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, BackendError>;
}

pub trait DocumentDecoder: Send + Sync {
    /// Extract page texts in original order.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<String>, DecodeError>;
}

/// Bound a backend call by `limit`, turning an elapsed deadline into
/// [`BackendError::Timeout`]. Dropping the returned future aborts the call.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}
