//! Concrete collaborators: Ollama-backed vision and reasoning models and
//! PDF and plain-text document decoders.

pub mod decode;
pub mod ollama;
pub mod pdf;

pub use decode::PlainTextDecoder;
pub use ollama::OllamaChat;
pub use pdf::{PdfDecoder, SniffingDecoder};
