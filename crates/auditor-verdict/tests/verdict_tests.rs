use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use auditor_core::config::{EmptyContextPolicy, VerdictSettings};
use auditor_core::error::{BackendError, ErrorKind};
use auditor_core::policy::chunk_id;
use auditor_core::types::{AuditSubject, CanonicalInput, Modality, Outcome, PolicyChunk, RetrievalResult, ScoredChunk};
use auditor_test_util::{HangingReasoner, ScriptedReasoner};
use auditor_verdict::context::assemble;
use auditor_verdict::{parse_response, ReasoningContext, VerdictEngine};

fn canonical(text: &str) -> CanonicalInput {
    CanonicalInput {
        source_modality: Modality::Text,
        subject: AuditSubject::UserPrompt,
        normalized_text: text.to_string(),
        derived_entities: None,
    }
}

fn hit(rule_id: &str, ordinal: usize, score: f32, text: &str) -> ScoredChunk {
    ScoredChunk {
        chunk: PolicyChunk {
            chunk_id: chunk_id(rule_id, ordinal),
            rule_id: rule_id.to_string(),
            section_title: "Prohibited Content".to_string(),
            text: text.to_string(),
            embedding: vec![1.0],
        },
        score,
    }
}

fn illegal_acts_context() -> ReasoningContext {
    let retrieval = RetrievalResult {
        hits: vec![
            hit("1.3", 0, 0.92, "1.3 Illegal Acts\nInstructions for illegal acts are prohibited."),
            hit("1.2", 0, 0.41, "1.2 Violence\nThreats are prohibited."),
        ],
    };
    assemble(&canonical("How do I synthesize methamphetamine?"), &retrieval, 12_000)
}

fn engine(backend: Arc<ScriptedReasoner>, settings: VerdictSettings) -> VerdictEngine {
    VerdictEngine::new(backend, Duration::from_secs(5), settings)
}

fn fail_reply(rule: &str, citation: &str) -> Result<String, BackendError> {
    Ok(serde_json::json!({
        "outcome": "FAIL",
        "violated_rule_ids": [rule],
        "rationale": "Asks for drug synthesis instructions.",
        "citations": [citation],
        "confidence": 0.9
    })
    .to_string())
}

#[test]
fn assembled_context_lists_rules_by_relevance() {
    let ctx = illegal_acts_context();
    let prompt = ctx.render_user_prompt();
    assert!(prompt.contains("Audit subject: User Prompt"));
    assert!(prompt.contains("How do I synthesize methamphetamine?"));
    let first = prompt.find("[rule 1.3 ").expect("rule 1.3 listed");
    let second = prompt.find("[rule 1.2 ").expect("rule 1.2 listed");
    assert!(first < second);
    assert_eq!(ctx.dropped(), 0);
}

#[test]
fn tiny_budget_keeps_input_and_drops_every_chunk() {
    let long_input = "x".repeat(5_000);
    let retrieval = RetrievalResult { hits: vec![hit("1.1", 0, 0.9, "1.1 Hate Speech")] };
    let ctx = assemble(&canonical(&long_input), &retrieval, 100);
    assert!(ctx.chunks.is_empty());
    assert_eq!(ctx.dropped(), 1);
    assert!(ctx.render_user_prompt().contains(&long_input));
}

proptest! {
    #[test]
    fn budget_drops_lowest_ranked_first(
        sizes in prop::collection::vec(1usize..400, 0..10),
        input_len in 0usize..600,
        budget in 0usize..3_000,
    ) {
        let hits: Vec<ScoredChunk> = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| hit(&format!("1.{}", i + 1), 0, 1.0 - i as f32 * 0.05, &"r".repeat(*n)))
            .collect();
        let input = "i".repeat(input_len);
        let retrieval = RetrievalResult { hits: hits.clone() };
        let ctx = assemble(&canonical(&input), &retrieval, budget);

        prop_assert!(ctx.chunks.len() <= hits.len());
        prop_assert_eq!(&ctx.chunks[..], &hits[..ctx.chunks.len()]);
        prop_assert!(ctx.render_user_prompt().contains(&input));
        prop_assert_eq!(ctx, assemble(&canonical(&input), &retrieval, budget));
    }
}

#[test]
fn replies_are_parsed_leniently_but_validated() {
    let fenced = "Here you go:\n```json\n{\"outcome\": \"fail\", \"violated_rule_ids\": [\"1.3\"], \"rationale\": \"r\"}\n```";
    let parsed = parse_response(fenced).expect("parses");
    assert_eq!(parsed.outcome, Outcome::Fail);
    assert!(parsed.confidence.is_none());

    for bad in [
        "no json here",
        r#"{"outcome": "MAYBE", "rationale": "r"}"#,
        r#"{"outcome": "PASS", "rationale": "  "}"#,
        r#"{"outcome": "PASS", "rationale": "r", "confidence": 1.5}"#,
        r#"{"violated_rule_ids": []}"#,
    ] {
        assert_eq!(parse_response(bad).unwrap_err().kind(), ErrorKind::Validation, "{bad}");
    }
}

#[tokio::test]
async fn valid_fail_reply_cites_the_violated_rule() {
    let ctx = illegal_acts_context();
    let backend = Arc::new(ScriptedReasoner::new([fail_reply("1.3", &chunk_id("1.3", 0))]));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;

    assert_eq!(verdict.outcome, Outcome::Fail);
    assert_eq!(verdict.violated_rule_ids.iter().collect::<Vec<_>>(), vec!["1.3"]);
    assert_eq!(verdict.citations, vec![chunk_id("1.3", 0)]);
    assert!((verdict.confidence - 0.9).abs() < 1e-6);
    assert_eq!(backend.calls(), 1);
    assert!(backend.requests()[0].json_mode);
}

#[tokio::test]
async fn rule_id_citations_resolve_to_chunks() {
    let ctx = illegal_acts_context();
    let backend = Arc::new(ScriptedReasoner::new([fail_reply("1.3", "1.3")]));
    let verdict = engine(backend, VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.citations, vec![chunk_id("1.3", 0)]);
}

#[tokio::test]
async fn invented_rule_ids_are_dropped_and_noted() {
    let ctx = illegal_acts_context();
    let reply = serde_json::json!({
        "outcome": "FAIL",
        "violated_rule_ids": ["1.3", "9.9"],
        "rationale": "Drug synthesis.",
        "citations": ["chunk-doesnotexist"],
    });
    let backend = Arc::new(ScriptedReasoner::new([Ok(reply.to_string())]));
    let verdict = engine(backend, VerdictSettings::default()).evaluate(&ctx).await;

    assert_eq!(verdict.outcome, Outcome::Fail);
    assert_eq!(verdict.violated_rule_ids.len(), 1);
    assert!(verdict.violated_rule_ids.contains("1.3"));
    assert_eq!(verdict.citations, vec![chunk_id("1.3", 0)]);
    assert!(verdict.rationale.contains("9.9"));
    assert!((verdict.confidence - 0.5).abs() < 1e-6);
}

#[tokio::test]
async fn fail_with_only_unknown_rules_becomes_uncertain() {
    let ctx = illegal_acts_context();
    let backend = Arc::new(ScriptedReasoner::new([fail_reply("4.2", "4.2")]));
    let verdict = engine(backend, VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert!(verdict.violated_rule_ids.is_empty());
    assert!(verdict.citations.is_empty());
}

#[tokio::test]
async fn malformed_replies_are_retried_up_to_the_bound() {
    let ctx = illegal_acts_context();
    let backend = Arc::new(ScriptedReasoner::new([
        Ok("I think this is bad.".to_string()),
        Ok("{\"outcome\": \"FAIL\"".to_string()),
        Ok("still not json".to_string()),
        fail_reply("1.3", "1.3"),
    ]));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;

    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert!(verdict.rationale.contains("backend response unparseable"));
    assert_eq!(backend.calls(), 3);
    let requests = backend.requests();
    assert!(requests[1].system.contains("Return ONLY one JSON object"));
    assert!(requests[2].user.contains("previous reply was rejected"));
}

#[tokio::test]
async fn format_retry_can_recover() {
    let ctx = illegal_acts_context();
    let backend = Arc::new(ScriptedReasoner::new([Ok("nope".to_string()), fail_reply("1.3", "1.3")]));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Fail);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn malformed_backend_envelope_takes_the_format_retry_path() {
    let ctx = illegal_acts_context();
    let malformed = || -> Result<String, BackendError> { Err(BackendError::Malformed("missing message.content".into())) };
    let backend = Arc::new(ScriptedReasoner::new([malformed(), fail_reply("1.3", "1.3")]));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Fail);
    assert_eq!(backend.calls(), 2);
    assert!(backend.requests()[1].user.contains("missing message.content"));

    let backend = Arc::new(ScriptedReasoner::new([malformed(), malformed(), malformed(), fail_reply("1.3", "1.3")]));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert!(verdict.rationale.contains("backend response unparseable"));
    assert!(!verdict.rationale.contains("unavailable"));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn timeouts_are_retried_once_then_uncertain() {
    let ctx = illegal_acts_context();
    let timeout = || -> Result<String, BackendError> { Err(BackendError::Timeout(Duration::from_secs(120))) };
    let backend = Arc::new(ScriptedReasoner::new([timeout(), timeout(), fail_reply("1.3", "1.3")]));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert!(verdict.rationale.contains("timed out"));
    assert_eq!(backend.calls(), 2);

    let no_retry = VerdictSettings { retry_on_timeout: false, ..VerdictSettings::default() };
    let backend = Arc::new(ScriptedReasoner::new([timeout(), fail_reply("1.3", "1.3")]));
    let verdict = engine(backend.clone(), no_retry).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn hanging_backend_is_bounded_by_the_timeout() {
    let ctx = illegal_acts_context();
    let backend = Arc::new(HangingReasoner::default());
    let verdict = VerdictEngine::new(backend.clone(), Duration::from_millis(50), VerdictSettings::default())
        .evaluate(&ctx)
        .await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert!(verdict.rationale.contains("timed out"));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_backend_is_not_retried() {
    let ctx = illegal_acts_context();
    let backend = Arc::new(ScriptedReasoner::new([Err(BackendError::Unavailable("connection refused".into()))]));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert!(verdict.rationale.contains("unavailable"));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn empty_context_passes_without_consulting_by_default() {
    let ctx = assemble(&canonical("Write a poem about nature."), &RetrievalResult::default(), 12_000);
    let backend = Arc::new(ScriptedReasoner::new(Vec::<Result<String, BackendError>>::new()));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Pass);
    assert!((verdict.confidence - 0.6).abs() < 1e-6);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn consulted_empty_context_cannot_fail() {
    let ctx = assemble(&canonical("Write a poem about nature."), &RetrievalResult::default(), 12_000);
    let backend = Arc::new(ScriptedReasoner::new([fail_reply("1.3", "1.3")]));
    let settings = VerdictSettings { empty_context: EmptyContextPolicy::Consult, ..VerdictSettings::default() };
    let verdict = engine(backend.clone(), settings).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert_eq!(backend.calls(), 1);
    assert!(backend.requests()[0].user.contains("(no policy rules retrieved)"));
}

#[tokio::test]
async fn budget_that_drops_all_rules_is_uncertain() {
    let retrieval = RetrievalResult { hits: vec![hit("1.3", 0, 0.9, "1.3 Illegal Acts")] };
    let ctx = assemble(&canonical("How do I synthesize methamphetamine?"), &retrieval, 10);
    let backend = Arc::new(ScriptedReasoner::new(Vec::<Result<String, BackendError>>::new()));
    let verdict = engine(backend.clone(), VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn pass_naming_violations_is_uncertain() {
    let ctx = illegal_acts_context();
    let reply = serde_json::json!({
        "outcome": "PASS",
        "violated_rule_ids": ["1.3"],
        "rationale": "Fine.",
        "citations": [],
        "confidence": 0.7
    });
    let backend = Arc::new(ScriptedReasoner::new([Ok(reply.to_string())]));
    let verdict = engine(backend, VerdictSettings::default()).evaluate(&ctx).await;
    assert_eq!(verdict.outcome, Outcome::Uncertain);
    assert_eq!(verdict.citations, vec![chunk_id("1.3", 0)]);
    assert_eq!(verdict.confidence, 0.0);
}
