//! Shared test utilities for the auditor workspace.
//!
//! Everything here stands in for a real model runtime: embedders with
//! predictable geometry, reasoning and vision backends that replay scripts
//! and count calls, and a decoder that returns fixed pages.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use auditor_core::error::{BackendError, DecodeError};
use auditor_core::traits::{DocumentDecoder, Embedder, ReasoningBackend, ReasoningRequest, VisionBackend};

/// Sample ruleset used across the test suites.
pub const SAMPLE_POLICY: &str = "\
AI Safety Policy (EU AI Act / Internal Rules)

1. Prohibited Content
1.1 Hate Speech
Content that demeans people based on ethnic origin, race or religion is prohibited, including slurs and claims that a group is inferior.

1.2 Violence
Threats, incitement to violence and instructions to kill or assault a person are prohibited.

1.3 Illegal Acts
Instructions for illegal acts are prohibited, including how to synthesize drugs such as methamphetamine and how to acquire or build weapons such as guns, rifles or explosives.

2. Privacy
2.1 Personal Data
Never reveal a private individual's home address, phone number or password.
";

const CONCEPTS: &[&[&str]] = &[
    &["hate", "slur", "ethnic", "racial", "race", "inferior", "religio", "demean"],
    &["kill", "attack", "violen", "threat", "murder", "assault"],
    &["illegal", "synthes", "drug", "narcotic", "meth", "weapon", "gun", "rifle", "firearm", "pistol", "explosive", "bomb"],
    &["suicide", "self-harm", "overdose"],
    &["address", "password", "phone", "ssn"],
    &["sexual", "explicit", "nude"],
];

/// Embeds text as counts of concept keywords (one dimension per concept).
/// Text with no concept keyword maps to the zero vector.
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; CONCEPTS.len()];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !(c.is_alphanumeric() || c == '-')).filter(|t| !t.is_empty()) {
            for (dim, stems) in CONCEPTS.iter().enumerate() {
                if stems.iter().any(|stem| token.starts_with(stem)) {
                    v[dim] += 1.0;
                }
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn provider_id(&self) -> &str {
        "keyword:v1"
    }

    fn dim(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }
}

/// Succeeds `ok_calls` times, then fails every call with `error`.
pub struct FailingEmbedder {
    ok_calls: usize,
    error: BackendError,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new(ok_calls: usize, error: BackendError) -> Self {
        Self { ok_calls, error, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn provider_id(&self) -> &str {
        "keyword:v1"
    }

    fn dim(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
            return Err(self.error.clone());
        }
        Ok(KeywordEmbedder::vector(text))
    }
}

/// Returns vectors of the wrong length, as a misconfigured provider would.
pub struct WrongDimEmbedder;

#[async_trait]
impl Embedder for WrongDimEmbedder {
    fn provider_id(&self) -> &str {
        "keyword:v1"
    }

    fn dim(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(vec![1.0; CONCEPTS.len() + 1])
    }
}

/// Returns NaN in every dimension.
pub struct NanEmbedder;

#[async_trait]
impl Embedder for NanEmbedder {
    fn provider_id(&self) -> &str {
        "keyword:v1"
    }

    fn dim(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(vec![f32::NAN; CONCEPTS.len()])
    }
}

/// Keyword embedder that parks every call until the gate is opened.
pub struct GatedEmbedder {
    gate: Semaphore,
    pub entered: Notify,
}

impl GatedEmbedder {
    pub fn new() -> Self {
        Self { gate: Semaphore::new(0), entered: Notify::new() }
    }

    pub fn open(&self) {
        self.gate.add_permits(1024);
    }
}

impl Default for GatedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn provider_id(&self) -> &str {
        "keyword:v1"
    }

    fn dim(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.entered.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        drop(permit);
        Ok(KeywordEmbedder::vector(text))
    }
}

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoner {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, BackendError>>,
    {
        Self { script: Mutex::new(responses.into_iter().collect()), requests: Mutex::default() }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedReasoner {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, BackendError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(BackendError::Unavailable("script exhausted".to_string())))
    }
}

/// Answers every prompt by failing the first rule listed in the context, or
/// passing when the context lists none.
#[derive(Default)]
pub struct TopRuleReasoner {
    pub calls: AtomicUsize,
}

impl TopRuleReasoner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReasoningBackend for TopRuleReasoner {
    fn model_id(&self) -> &str {
        "top-rule"
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rule = request
            .user
            .lines()
            .find_map(|l| l.strip_prefix("[rule ").and_then(|rest| rest.split(' ').next()))
            .map(str::to_string);
        let body = match rule {
            Some(rule_id) => serde_json::json!({
                "outcome": "FAIL",
                "violated_rule_ids": [rule_id],
                "rationale": format!("The content matches rule {rule_id}."),
                "citations": [rule_id],
                "confidence": 0.9,
            }),
            None => serde_json::json!({
                "outcome": "PASS",
                "violated_rule_ids": [],
                "rationale": "No rule applies.",
                "citations": [],
                "confidence": 0.8,
            }),
        };
        Ok(body.to_string())
    }
}

/// Never answers; used to exercise timeouts and cancellation.
#[derive(Default)]
pub struct HangingReasoner {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ReasoningBackend for HangingReasoner {
    fn model_id(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: &ReasoningRequest) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(BackendError::Unavailable("unreachable".to_string()))
    }
}

/// Vision backend returning a fixed response and recording instructions.
pub struct ScriptedVision {
    response: Result<String, BackendError>,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedVision {
    pub fn new(response: Result<String, BackendError>) -> Self {
        Self { response, instructions: Mutex::default() }
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VisionBackend for ScriptedVision {
    fn model_id(&self) -> &str {
        "scripted-vision"
    }

    async fn describe(&self, _image: &[u8], instruction: &str) -> Result<String, BackendError> {
        if let Ok(mut log) = self.instructions.lock() {
            log.push(instruction.to_string());
        }
        self.response.clone()
    }
}

/// Decoder returning fixed pages, or a fixed error.
pub struct StaticDecoder(pub Result<Vec<String>, DecodeError>);

impl StaticDecoder {
    pub fn pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Ok(pages.into_iter().map(Into::into).collect()))
    }
}

impl DocumentDecoder for StaticDecoder {
    fn decode(&self, _bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
        self.0.clone()
    }
}
