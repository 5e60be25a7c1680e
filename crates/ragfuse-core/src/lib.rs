//! Shared foundation for the ragfuse retrieval crates.
//!
//! Domain types, the error taxonomy, the tokenizer, the traits at the seams
//! between stages, Figment-backed configuration, bounded retry and the HTTP
//! plumbing used by every remote collaborator.

pub mod config;
pub mod corpus;
pub mod error;
pub mod http;
pub mod retry;
pub mod settings;
pub mod tokenize;
pub mod traits;
pub mod types;

pub use error::{Error, RemoteError, Result};
pub use types::{ChunkId, ContextSnippet, DocumentChunk, Metadata, SearchHit, SourceKind};
