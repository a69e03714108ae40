use lopdf::Document;
use tracing::debug;

use auditor_core::error::DecodeError;
use auditor_core::traits::DocumentDecoder;

use crate::decode::PlainTextDecoder;

/// Extracts text from a PDF, one string per page in page order. Pages
/// without a text layer (scans) come back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfDecoder;

impl DocumentDecoder for PdfDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
        let doc = Document::load_mem(bytes).map_err(|e| DecodeError::Corrupt(format!("unreadable pdf: {e}")))?;
        if doc.is_encrypted() {
            return Err(DecodeError::Unsupported("encrypted pdf".to_string()));
        }
        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(DecodeError::Corrupt("pdf has no pages".to_string()));
        }
        let mut texts = Vec::with_capacity(pages.len());
        for number in pages.keys() {
            let text = doc
                .extract_text(&[*number])
                .map_err(|e| DecodeError::Corrupt(format!("page {number}: {e}")))?;
            texts.push(text.trim_end().to_string());
        }
        debug!(pages = texts.len(), "decoded pdf");
        Ok(texts)
    }
}

/// Picks a decoder by file signature: PDFs go to [`PdfDecoder`], everything
/// else to [`PlainTextDecoder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SniffingDecoder;

impl DocumentDecoder for SniffingDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
        if bytes.starts_with(b"%PDF") {
            PdfDecoder.decode(bytes)
        } else {
            PlainTextDecoder.decode(bytes)
        }
    }
}
