//! Domain layer types and invariants.

pub mod document;
pub mod error;

pub use document::{CacheEntry, Document, DocumentId, DocumentMeta};
pub use error::DomainError;
