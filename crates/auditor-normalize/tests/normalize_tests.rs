use std::sync::Arc;
use std::time::Duration;

use auditor_core::error::{BackendError, DecodeError, ErrorKind};
use auditor_core::types::{AuditRequest, AuditSubject, Modality};
use auditor_normalize::{ModalityNormalizer, VISION_INSTRUCTION};
use auditor_test_util::{ScriptedVision, StaticDecoder};

fn normalizer(decoder: StaticDecoder, vision: Arc<ScriptedVision>) -> ModalityNormalizer {
    ModalityNormalizer::new(Arc::new(decoder), vision, Duration::from_secs(5))
}

fn idle_vision() -> Arc<ScriptedVision> {
    Arc::new(ScriptedVision::new(Err(BackendError::Unavailable("not used".into()))))
}

#[tokio::test]
async fn text_passes_through_unchanged() -> anyhow::Result<()> {
    let vision = idle_vision();
    let n = normalizer(StaticDecoder::pages(Vec::<String>::new()), vision.clone());
    let request = AuditRequest::text("  Write a poem about autumn.\n").with_subject(AuditSubject::UserPrompt);
    let canonical = n.normalize(&request).await?;
    assert_eq!(canonical.normalized_text, "  Write a poem about autumn.\n");
    assert_eq!(canonical.source_modality, Modality::Text);
    assert_eq!(canonical.subject, AuditSubject::UserPrompt);
    assert!(canonical.derived_entities.is_none());
    assert!(vision.instructions().is_empty());
    Ok(())
}

#[tokio::test]
async fn blank_text_is_a_normalization_error() {
    let n = normalizer(StaticDecoder::pages(Vec::<String>::new()), idle_vision());
    let err = n.normalize(&AuditRequest::text(" \n\t")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normalization);
}

#[tokio::test]
async fn document_pages_are_joined_in_order_with_markers() -> anyhow::Result<()> {
    let n = normalizer(StaticDecoder::pages(["first page", "second page", "third page"]), idle_vision());
    let canonical = n.normalize(&AuditRequest::document(b"%bytes".to_vec())).await?;
    let text = &canonical.normalized_text;
    assert!(text.starts_with("first page"));
    let second = text.find("--- page 2 ---").expect("marker 2");
    let third = text.find("--- page 3 ---").expect("marker 3");
    assert!(second < text.find("second page").expect("page 2"));
    assert!(third > second);
    assert_eq!(canonical.source_modality, Modality::Document);
    Ok(())
}

#[tokio::test]
async fn undecodable_or_empty_documents_fail() {
    let corrupt = normalizer(StaticDecoder(Err(DecodeError::Corrupt("bad xref".into()))), idle_vision());
    let err = corrupt.normalize(&AuditRequest::document(b"junk".to_vec())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normalization);

    let blank = normalizer(StaticDecoder::pages(["", "   "]), idle_vision());
    let err = blank.normalize(&AuditRequest::document(b"x".to_vec())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normalization);
}

#[tokio::test]
async fn image_is_described_objectively_with_entities() -> anyhow::Result<()> {
    let vision = Arc::new(ScriptedVision::new(Ok(
        r#"{"description": "A person holds a pistol over a table.", "entities": ["pistol", "person", "table"]}"#.into(),
    )));
    let n = normalizer(StaticDecoder::pages(Vec::<String>::new()), vision.clone());
    let canonical = n.normalize(&AuditRequest::image(vec![0x89, 0x50])).await?;

    assert_eq!(canonical.source_modality, Modality::Image);
    assert_eq!(
        canonical.derived_entities,
        Some(vec!["pistol".to_string(), "person".to_string(), "table".to_string()])
    );
    assert!(canonical.normalized_text.ends_with("Observed entities: pistol, person, table"));
    assert_eq!(vision.instructions(), vec![VISION_INSTRUCTION.to_string()]);
    Ok(())
}

#[tokio::test]
async fn vision_failures_are_normalization_errors() {
    let down = normalizer(
        StaticDecoder::pages(Vec::<String>::new()),
        Arc::new(ScriptedVision::new(Err(BackendError::Unavailable("connection refused".into())))),
    );
    let err = down.normalize(&AuditRequest::image(vec![1, 2, 3])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normalization);

    let empty = normalizer(StaticDecoder::pages(Vec::<String>::new()), Arc::new(ScriptedVision::new(Ok("  ".into()))));
    let err = empty.normalize(&AuditRequest::image(vec![1, 2, 3])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normalization);
}
