//! Grounded judgment: assemble a bounded reasoning context from retrieved
//! policy chunks, ask the reasoning backend for a verdict, and validate and
//! reconcile whatever comes back against that context.

pub mod context;
pub mod engine;
pub mod prompt;
pub mod response;

pub use context::{ContextAssembler, ReasoningContext};
pub use engine::VerdictEngine;
pub use response::{parse_response, reconcile, RawVerdict};
