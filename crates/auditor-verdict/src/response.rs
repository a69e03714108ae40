//! Parsing and reconciliation of reasoning-backend replies.

use std::collections::BTreeSet;

use serde::Deserialize;

use auditor_core::error::{Error, Result};
use auditor_core::types::{ChunkId, Outcome, RuleId, Verdict};

use crate::context::ReasoningContext;

const DEFAULT_CONFIDENCE: f32 = 0.5;

/// A schema-valid reply, not yet checked against the context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawVerdict {
    #[serde(deserialize_with = "outcome_any_case")]
    pub outcome: Outcome,
    #[serde(default)]
    pub violated_rule_ids: Vec<String>,
    pub rationale: String,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

fn outcome_any_case<'de, D>(deserializer: D) -> std::result::Result<Outcome, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_uppercase().as_str() {
        "PASS" => Ok(Outcome::Pass),
        "FAIL" => Ok(Outcome::Fail),
        "UNCERTAIN" => Ok(Outcome::Uncertain),
        other => Err(serde::de::Error::custom(format!("unknown outcome {:?}", other))),
    }
}

/// Extract and schema-check the JSON object in a backend reply. Accepts
/// code fences and surrounding prose; everything else is a validation error.
pub fn parse_response(raw: &str) -> Result<RawVerdict> {
    let json = extract_object(raw).ok_or_else(|| Error::Validation("reply contains no JSON object".to_string()))?;
    let parsed: RawVerdict =
        serde_json::from_str(json).map_err(|e| Error::Validation(format!("reply does not match verdict schema: {}", e)))?;
    if parsed.rationale.trim().is_empty() {
        return Err(Error::Validation("rationale is empty".to_string()));
    }
    if let Some(c) = parsed.confidence {
        if !c.is_finite() || !(0.0..=1.0).contains(&c) {
            return Err(Error::Validation(format!("confidence {} is outside [0, 1]", c)));
        }
    }
    Ok(parsed)
}

fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Check a parsed reply against the rules actually supplied and produce the
/// final verdict. Nothing the backend names outside the context survives;
/// each adjustment is noted in the rationale.
pub fn reconcile(raw: RawVerdict, ctx: &ReasoningContext) -> Verdict {
    let context_rules = ctx.rule_ids();
    let mut notes = Vec::new();

    let mut violated: BTreeSet<RuleId> = BTreeSet::new();
    let mut unknown_rules = Vec::new();
    for id in raw.violated_rule_ids.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if context_rules.contains(id) {
            violated.insert(id.to_string());
        } else if !unknown_rules.iter().any(|u| u == id) {
            unknown_rules.push(id.to_string());
        }
    }
    if !unknown_rules.is_empty() {
        notes.push(format!("dropped rule ids absent from the supplied context: {}", unknown_rules.join(", ")));
    }

    let mut citations: Vec<ChunkId> = Vec::new();
    let mut unknown_citations = Vec::new();
    for cite in raw.citations.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let resolved = if ctx.rule_of_chunk(cite).is_some() {
            vec![cite.to_string()]
        } else {
            ctx.chunks_for_rule(cite)
        };
        if resolved.is_empty() {
            unknown_citations.push(cite.to_string());
        }
        for id in resolved {
            if !citations.contains(&id) {
                citations.push(id);
            }
        }
    }
    if !unknown_citations.is_empty() {
        notes.push(format!("dropped unknown citations: {}", unknown_citations.join(", ")));
    }

    let mut outcome = raw.outcome;
    if outcome == Outcome::Pass && !violated.is_empty() {
        outcome = Outcome::Uncertain;
        notes.push(format!(
            "PASS contradicted by violated rule ids: {}",
            violated.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if outcome != Outcome::Pass {
        // Citations must back a violated rule; every violated rule needs one.
        citations.retain(|c| ctx.rule_of_chunk(c).is_some_and(|r| violated.contains(r)));
        for rule in &violated {
            if !citations.iter().any(|c| ctx.rule_of_chunk(c) == Some(rule.as_str())) {
                citations.extend(ctx.chunks_for_rule(rule));
            }
        }
        if outcome == Outcome::Fail && violated.is_empty() {
            outcome = Outcome::Uncertain;
            notes.push("FAIL named no rule from the supplied context".to_string());
        }
    }

    let mut rationale = raw.rationale.trim().to_string();
    if !notes.is_empty() {
        rationale.push_str(&format!(" [reconciliation: {}]", notes.join("; ")));
        tracing::warn!(notes = %notes.join("; "), "backend verdict adjusted");
    }
    let confidence = if outcome == raw.outcome { raw.confidence.unwrap_or(DEFAULT_CONFIDENCE) } else { 0.0 };

    Verdict { outcome, violated_rule_ids: violated, rationale, citations, confidence }
}
