use auditor_core::error::DecodeError;
use auditor_core::traits::DocumentDecoder;

/// Decodes UTF-8 text documents, splitting pages on form feeds (`\x0C`), the
/// page separator emitted by common text extractors.
///
/// Binary formats are recognised by signature and rejected as unsupported so
/// they never reach retrieval as garbage text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextDecoder;

const BINARY_SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF", "pdf"),
    (b"PK\x03\x04", "zip container"),
    (b"\x89PNG", "png"),
    (b"\xFF\xD8\xFF", "jpeg"),
];

impl DocumentDecoder for PlainTextDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
        if let Some((_, name)) = BINARY_SIGNATURES.iter().find(|(sig, _)| bytes.starts_with(sig)) {
            return Err(DecodeError::Unsupported(format!("{name} documents need a dedicated decoder")));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DecodeError::Corrupt(format!("not valid UTF-8: {e}")))?;
        if text.contains('\0') {
            return Err(DecodeError::Corrupt("embedded NUL bytes".to_string()));
        }
        Ok(text.split('\x0C').map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_pages_on_form_feed() {
        let pages = PlainTextDecoder.decode(b"page one\x0Cpage two").expect("decode");
        assert_eq!(pages, vec!["page one", "page two"]);
    }

    #[test]
    fn rejects_pdf_and_invalid_utf8() {
        assert!(matches!(PlainTextDecoder.decode(b"%PDF-1.7 ..."), Err(DecodeError::Unsupported(_))));
        assert!(matches!(PlainTextDecoder.decode(&[0x66, 0xff, 0xfe]), Err(DecodeError::Corrupt(_))));
    }
}
