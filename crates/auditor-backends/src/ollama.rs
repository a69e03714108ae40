use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use auditor_core::error::BackendError;
use auditor_core::traits::{ReasoningBackend, ReasoningRequest, VisionBackend};

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Non-streaming client for Ollama's `POST /api/chat`.
///
/// One instance serves one model; build separate instances for the vision
/// and the reasoning model.
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(host: &str, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: format!("{}/api/chat", host.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!("HTTP {status}: {body}")));
        }
        let parsed: ChatResponse =
            response.json().await.map_err(|e| BackendError::Malformed(e.to_string()))?;
        tracing::debug!(model = %self.model, chars = parsed.message.content.len(), "chat response");
        Ok(parsed.message.content)
    }
}

fn reasoning_messages(request: &ReasoningRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage { role: "system", content: request.system.clone(), images: Vec::new() },
        ChatMessage { role: "user", content: request.user.clone(), images: Vec::new() },
    ]
}

#[async_trait]
impl ReasoningBackend for OllamaChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: reasoning_messages(request),
            stream: false,
            format: request.json_mode.then_some("json"),
        };
        self.chat(&body).await
    }
}

#[async_trait]
impl VisionBackend for OllamaChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn describe(&self, image: &[u8], instruction: &str) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: instruction.to_string(),
                images: vec![STANDARD.encode(image)],
            }],
            stream: false,
            format: None,
        };
        self.chat(&body).await
    }
}
