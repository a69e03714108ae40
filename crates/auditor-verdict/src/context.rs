use std::collections::BTreeSet;

use auditor_core::types::{CanonicalInput, ChunkId, Modality, RetrievalResult, RuleId, ScoredChunk};

/// The canonical input plus the policy chunks that fit the budget, highest
/// relevance first.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningContext {
    pub input: CanonicalInput,
    pub chunks: Vec<ScoredChunk>,
    /// Number of chunks retrieval returned before budgeting.
    pub retrieved: usize,
}

impl ReasoningContext {
    pub fn dropped(&self) -> usize {
        self.retrieved - self.chunks.len()
    }

    pub fn rule_ids(&self) -> BTreeSet<RuleId> {
        self.chunks.iter().map(|c| c.chunk.rule_id.clone()).collect()
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.chunks.iter().map(|c| c.chunk.chunk_id.clone()).collect()
    }

    /// Chunk ids in context order that belong to `rule_id`.
    pub fn chunks_for_rule(&self, rule_id: &str) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|c| c.chunk.rule_id == rule_id)
            .map(|c| c.chunk.chunk_id.clone())
            .collect()
    }

    pub fn rule_of_chunk(&self, chunk_id: &str) -> Option<&str> {
        self.chunks
            .iter()
            .find(|c| c.chunk.chunk_id == chunk_id)
            .map(|c| c.chunk.rule_id.as_str())
    }

    pub fn render_user_prompt(&self) -> String {
        let mut out = render_input(&self.input);
        if self.chunks.is_empty() {
            out.push_str(NO_RULES);
        } else {
            out.push_str(RULES_HEADER);
            for chunk in &self.chunks {
                out.push_str(&render_chunk(chunk));
            }
            out.push_str(RULES_FOOTER);
        }
        out
    }
}

const RULES_HEADER: &str = "=== POLICY RULES ===\n";
const RULES_FOOTER: &str = "=== END POLICY RULES ===\n";
const NO_RULES: &str = "=== POLICY RULES ===\n(no policy rules retrieved)\n=== END POLICY RULES ===\n";

fn render_input(input: &CanonicalInput) -> String {
    let modality = match input.source_modality {
        Modality::Text => "text",
        Modality::Document => "document",
        Modality::Image => "image",
    };
    format!(
        "Audit subject: {}\nSource modality: {}\n\n=== INPUT ===\n{}\n=== END INPUT ===\n\n",
        input.subject.label(),
        modality,
        input.normalized_text
    )
}

fn render_chunk(scored: &ScoredChunk) -> String {
    let chunk = &scored.chunk;
    format!(
        "[rule {} | {} | section: {} | relevance {:.3}]\n{}\n\n",
        chunk.rule_id, chunk.chunk_id, chunk.section_title, scored.score, chunk.text
    )
}

/// Fits retrieved chunks into a character budget. The canonical input is
/// always included in full; chunks are admitted in rank order until the
/// next one would overflow.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    budget_chars: usize,
}

impl ContextAssembler {
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    pub fn assemble(&self, input: &CanonicalInput, retrieval: &RetrievalResult) -> ReasoningContext {
        assemble(input, retrieval, self.budget_chars)
    }
}

pub fn assemble(input: &CanonicalInput, retrieval: &RetrievalResult, budget_chars: usize) -> ReasoningContext {
    let mut used = render_input(input).chars().count() + RULES_HEADER.chars().count() + RULES_FOOTER.chars().count();
    let mut chunks = Vec::new();
    for hit in &retrieval.hits {
        let cost = render_chunk(hit).chars().count();
        if used + cost > budget_chars {
            break;
        }
        used += cost;
        chunks.push(hit.clone());
    }
    if chunks.len() < retrieval.len() {
        tracing::debug!(
            kept = chunks.len(),
            dropped = retrieval.len() - chunks.len(),
            budget_chars,
            "context budget reached"
        );
    }
    ReasoningContext { input: input.clone(), chunks, retrieved: retrieval.len() }
}
