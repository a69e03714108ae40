pub mod config;
pub mod error;
pub mod policy;
pub mod traits;
pub mod types;

pub use error::{BackendError, DecodeError, Error, ErrorKind, Result};
