//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` +
//! `config.<env>.toml` + `APP_*` env vars (`__` separates nested keys, e.g.
//! `APP_RETRIEVAL__K=5`). Provides helpers to expand `~` and `${VAR}` and to
//! resolve relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the typed settings tree.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ollama: OllamaSettings,
    pub embedding: EmbeddingSettings,
    pub vision: ModelSettings,
    pub reasoning: ModelSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub context: ContextSettings,
    pub verdict: VerdictSettings,
    pub pipeline: PipelineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama: OllamaSettings::default(),
            embedding: EmbeddingSettings::default(),
            vision: ModelSettings::vision_default(),
            reasoning: ModelSettings::default(),
            index: IndexSettings::default(),
            retrieval: RetrievalSettings::default(),
            context: ContextSettings::default(),
            verdict: VerdictSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be positive".into()));
        }
        if self.retrieval.k == 0 {
            return Err(Error::InvalidConfig("retrieval.k must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.min_similarity must be within [-1, 1], got {}",
                self.retrieval.min_similarity
            )));
        }
        if self.context.budget_chars == 0 {
            return Err(Error::InvalidConfig("context.budget_chars must be positive".into()));
        }
        if self.pipeline.max_concurrent_audits == 0 {
            return Err(Error::InvalidConfig("pipeline.max_concurrent_audits must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.verdict.empty_context_confidence) {
            return Err(Error::InvalidConfig(
                "verdict.empty_context_confidence must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub host: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self { host: "http://localhost:11434".to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Ollama,
    Fake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dim: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            model: "nomic-embed-text".to_string(),
            dim: 768,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Model name plus per-call timeout, shared by the vision and reasoning
/// backends. The derived default is the reasoning model; see
/// [`ModelSettings::vision_default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self { model: "llama3".to_string(), timeout_secs: 120 }
    }
}

impl ModelSettings {
    pub fn vision_default() -> Self {
        Self { model: "llava".to_string(), timeout_secs: 120 }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub policy_path: String,
    pub index_path: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            policy_path: "policies/safety_policy.txt".to_string(),
            index_path: "data/policy_index.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k: usize,
    pub min_similarity: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { k: 3, min_similarity: 0.35 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Maximum size of the reasoning context in characters.
    pub budget_chars: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self { budget_chars: 12_000 }
    }
}

/// How the verdict stage treats a context with no retrieved rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyContextPolicy {
    /// Return PASS without consulting the backend.
    Pass,
    /// Ask the backend anyway; FAIL is impossible without citations.
    Consult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictSettings {
    pub max_format_retries: usize,
    pub retry_on_timeout: bool,
    pub empty_context: EmptyContextPolicy,
    pub empty_context_confidence: f32,
}

impl Default for VerdictSettings {
    fn default() -> Self {
        Self {
            max_format_retries: 2,
            retry_on_timeout: true,
            empty_context: EmptyContextPolicy::Pass,
            empty_context_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_concurrent_audits: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { max_concurrent_audits: 4 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
