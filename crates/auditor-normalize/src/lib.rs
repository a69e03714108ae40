//! Reduces every audit modality to a single canonical text.
//!
//! Text passes through unchanged, documents are decoded page by page, and
//! images are described by the vision backend under an instruction that asks
//! for observation only. Judgment happens later, against retrieved rules.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use auditor_core::error::{Error, Result};
use auditor_core::traits::{with_timeout, DocumentDecoder, VisionBackend};
use auditor_core::types::{AuditInput, AuditRequest, CanonicalInput};

/// Instruction sent with every image. It asks for a neutral inventory of what
/// is visible and explicitly forbids any acceptability judgment.
pub const VISION_INSTRUCTION: &str = "\
Describe the physical objects and actions in this image in strict detail. \
Be objective and factual. Do not minimize or soften the description. \
If there is a weapon, state clearly what kind of weapon it is. \
Do not judge whether the content is acceptable, safe or compliant; only report what is visible.\n\
Respond with a JSON object of the form \
{\"description\": \"<one paragraph>\", \"entities\": [\"<short label for each object, person or action>\"]}.";

pub const ENTITIES_PREFIX: &str = "Observed entities:";

pub fn page_marker(page_number: usize) -> String {
    format!("\n\n--- page {} ---\n\n", page_number)
}

pub struct ModalityNormalizer {
    decoder: Arc<dyn DocumentDecoder>,
    vision: Arc<dyn VisionBackend>,
    vision_timeout: Duration,
}

impl ModalityNormalizer {
    pub fn new(decoder: Arc<dyn DocumentDecoder>, vision: Arc<dyn VisionBackend>, vision_timeout: Duration) -> Self {
        Self { decoder, vision, vision_timeout }
    }

    pub async fn normalize(&self, request: &AuditRequest) -> Result<CanonicalInput> {
        let modality = request.modality();
        let (normalized_text, derived_entities) = match &request.input {
            AuditInput::Text(text) => (normalize_text(text)?, None),
            AuditInput::Document(bytes) => (self.normalize_document(bytes)?, None),
            AuditInput::Image(bytes) => {
                let (text, entities) = self.normalize_image(bytes).await?;
                (text, Some(entities))
            }
        };
        debug!(?modality, chars = normalized_text.chars().count(), "input normalized");
        Ok(CanonicalInput { source_modality: modality, subject: request.subject, normalized_text, derived_entities })
    }

    fn normalize_document(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::Normalization("document payload is empty".to_string()));
        }
        let pages = self.decoder.decode(bytes).map_err(|e| Error::Normalization(e.to_string()))?;
        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::Normalization("document contains no extractable text".to_string()));
        }
        let mut text = String::new();
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                text.push_str(&page_marker(i + 1));
            }
            text.push_str(page.trim_end());
        }
        info!(pages = pages.len(), "document decoded");
        Ok(text)
    }

    async fn normalize_image(&self, bytes: &[u8]) -> Result<(String, Vec<String>)> {
        if bytes.is_empty() {
            return Err(Error::Normalization("image payload is empty".to_string()));
        }
        let raw = with_timeout(self.vision_timeout, self.vision.describe(bytes, VISION_INSTRUCTION))
            .await
            .map_err(|e| Error::Normalization(format!("vision backend {}: {}", self.vision.model_id(), e)))?;
        let description = parse_description(&raw)?;
        info!(entities = description.entities.len(), model = self.vision.model_id(), "image described");
        Ok((description.canonical_text(), description.entities))
    }
}

fn normalize_text(text: &str) -> Result<String> {
    if text.trim().is_empty() {
        return Err(Error::Normalization("text input is empty".to_string()));
    }
    Ok(text.to_string())
}

/// Objective description returned by the vision backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ImageDescription {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

impl ImageDescription {
    pub fn canonical_text(&self) -> String {
        if self.entities.is_empty() {
            return self.description.clone();
        }
        let entities = self.entities.join(", ");
        if self.description.is_empty() {
            format!("{} {}", ENTITIES_PREFIX, entities)
        } else {
            format!("{}\n{} {}", self.description, ENTITIES_PREFIX, entities)
        }
    }
}

/// Accept the requested JSON shape (optionally inside a code fence) or plain
/// prose, where `-`/`*` bullet lines become entities.
pub fn parse_description(raw: &str) -> Result<ImageDescription> {
    let trimmed = strip_fence(raw.trim());
    if trimmed.is_empty() {
        return Err(Error::Normalization("vision backend returned an empty description".to_string()));
    }

    let mut parsed = match serde_json::from_str::<ImageDescription>(trimmed) {
        Ok(parsed) => parsed,
        Err(_) if trimmed.starts_with('{') => {
            return Err(Error::Normalization("vision backend returned garbled JSON".to_string()));
        }
        Err(_) => parse_prose(trimmed),
    };
    parsed.description = parsed.description.trim().to_string();
    parsed.entities = clean_entities(parsed.entities);

    if parsed.description.is_empty() && parsed.entities.is_empty() {
        return Err(Error::Normalization("vision backend returned an empty description".to_string()));
    }
    if !parsed.description.is_empty() && !parsed.description.chars().any(char::is_alphanumeric) {
        return Err(Error::Normalization("vision backend returned a garbled description".to_string()));
    }
    Ok(parsed)
}

fn parse_prose(text: &str) -> ImageDescription {
    let mut description = Vec::new();
    let mut entities = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            entities.push(item.to_string());
        } else if !line.is_empty() {
            description.push(line);
        }
    }
    ImageDescription { description: description.join(" "), entities }
}

fn clean_entities(entities: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(entities.len());
    for entity in entities {
        let entity = entity.trim().trim_end_matches(['.', ',', ';']).trim().to_lowercase();
        if !entity.is_empty() && !out.contains(&entity) {
            out.push(entity);
        }
    }
    out
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_description_is_parsed_and_entities_cleaned() {
        let d = parse_description(r#"{"description": "A man holds a rifle.", "entities": ["Rifle", " man ", "rifle"]}"#)
            .expect("parses");
        assert_eq!(d.description, "A man holds a rifle.");
        assert_eq!(d.entities, vec!["rifle", "man"]);
        assert_eq!(d.canonical_text(), "A man holds a rifle.\nObserved entities: rifle, man");
    }

    #[test]
    fn fenced_json_is_accepted() {
        let d = parse_description("```json\n{\"description\": \"A cat on a sofa.\"}\n```").expect("parses");
        assert_eq!(d.description, "A cat on a sofa.");
        assert!(d.entities.is_empty());
        assert_eq!(d.canonical_text(), "A cat on a sofa.");
    }

    #[test]
    fn prose_with_bullets_falls_back() {
        let d = parse_description("The image shows a kitchen.\n- knife\n- cutting board\n").expect("parses");
        assert_eq!(d.description, "The image shows a kitchen.");
        assert_eq!(d.entities, vec!["knife", "cutting board"]);
    }

    #[test]
    fn empty_and_garbled_output_is_rejected() {
        assert!(parse_description("   ").is_err());
        assert!(parse_description("{\"description\": ").is_err());
        assert!(parse_description("{\"description\": \"\", \"entities\": []}").is_err());
        assert!(parse_description("?!?! ...").is_err());
    }

    #[test]
    fn instruction_never_asks_for_a_judgment() {
        let lower = VISION_INSTRUCTION.to_lowercase();
        assert!(lower.contains("objective"));
        assert!(lower.contains("do not judge"));
        assert!(!lower.contains("violat"));
    }
}
