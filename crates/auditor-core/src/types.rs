//! Domain types shared by the indexer, the per-request pipeline and callers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ErrorKind;

pub type ChunkId = String;
pub type RuleId = String;
pub type Meta = BTreeMap<String, String>;

/// A retrievable fragment of the ruleset, scoped to a single rule.
///
/// - `chunk_id`: deterministic identifier derived from `rule_id` and the
///   paragraph ordinal within the rule
/// - `rule_id`: dotted rule number exactly as written in the policy ("1.3")
/// - `section_title`: title of the enclosing numbered section, verbatim
/// - `text`: rule heading plus the paragraph it covers
/// - `embedding`: vector from the provider recorded in the index metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChunk {
    pub chunk_id: ChunkId,
    pub rule_id: RuleId,
    pub section_title: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Document,
    Image,
}

/// The payload of an audit request. Exactly one normalization path applies
/// to each variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "modality", content = "payload", rename_all = "snake_case")]
pub enum AuditInput {
    Text(String),
    Document(Vec<u8>),
    Image(Vec<u8>),
}

impl AuditInput {
    pub fn modality(&self) -> Modality {
        match self {
            Self::Text(_) => Modality::Text,
            Self::Document(_) => Modality::Document,
            Self::Image(_) => Modality::Image,
        }
    }
}

/// What the audited content is, as far as the caller knows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSubject {
    UserPrompt,
    ModelOutput,
    #[default]
    Content,
}

impl AuditSubject {
    pub fn label(self) -> &'static str {
        match self {
            Self::UserPrompt => "User Prompt",
            Self::ModelOutput => "Model Output",
            Self::Content => "Content",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRequest {
    pub input: AuditInput,
    #[serde(default)]
    pub subject: AuditSubject,
    #[serde(default)]
    pub metadata: Meta,
}

impl AuditRequest {
    pub fn new(input: AuditInput) -> Self {
        Self { input, subject: AuditSubject::default(), metadata: Meta::new() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(AuditInput::Text(text.into()))
    }

    pub fn document(bytes: Vec<u8>) -> Self {
        Self::new(AuditInput::Document(bytes))
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self::new(AuditInput::Image(bytes))
    }

    pub fn with_subject(mut self, subject: AuditSubject) -> Self {
        self.subject = subject;
        self
    }

    pub fn modality(&self) -> Modality {
        self.input.modality()
    }
}

/// The single textual form every modality is reduced to before retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalInput {
    pub source_modality: Modality,
    pub subject: AuditSubject,
    pub normalized_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_entities: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: PolicyChunk,
    pub score: f32,
}

/// Ranked retrieval output: highest score first, ties by ascending `rule_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Uncertain,
}

/// Structured, citation-backed judgment.
///
/// A `Fail` verdict always cites at least one chunk whose rule id appears in
/// `violated_rule_ids`, and every violated rule id is backed by a citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub violated_rule_ids: BTreeSet<RuleId>,
    pub rationale: String,
    pub citations: Vec<ChunkId>,
    pub confidence: f32,
}

impl Verdict {
    pub fn uncertain(rationale: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Uncertain,
            violated_rule_ids: BTreeSet::new(),
            rationale: rationale.into(),
            citations: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Admission,
    Normalization,
    Retrieval,
    Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of one `audit()` call: a verdict or a classified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditResult {
    Verdict(Verdict),
    Failure(FailureDescriptor),
}

impl AuditResult {
    pub fn failure(stage: Stage, error: &crate::error::Error) -> Self {
        Self::Failure(FailureDescriptor { stage, kind: error.kind(), message: error.to_string() })
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Verdict(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.verdict().map(|v| v.outcome)
    }
}
