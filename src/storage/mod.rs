//! Storage primitives: JSON documents and line-delimited logs.
//!
//! Every persistent file in the system is owned by exactly one component and
//! lives under the workspace root. Two primitives cover all of them:
//!
//! - [`DocumentStore`]: load → mutate → save of a whole JSON document,
//!   serialized behind a per-file mutex.
//! - [`AppendLog`]: append-only JSONL with lenient reads.

mod document;
mod log;

pub use document::DocumentStore;
pub use log::AppendLog;

use thiserror::Error;

/// Error type for storage operations.
///
/// Reads never produce these; a missing or malformed file loads as the
/// component's empty value. Write failures propagate to the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// Used wherever a caller-supplied name becomes part of a filename (board
/// logs, workflow checkpoints).
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
