//! Structured-output decoder: raw model text → typed record, or `DecodeError`.
//!
//! Strict by construction. The only tolerated wrapping is a single markdown
//! code fence around the JSON; anything else that keeps the text from
//! parsing as the target record is a schema mismatch.

use std::fmt;

use thiserror::Error;

use crate::interview::schema::StructuredOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    SchemaMismatch,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::SchemaMismatch => f.write_str("schema mismatch"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} decoding {target}: {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub target: &'static str,
    pub detail: String,
    /// The model output exactly as received.
    pub raw: String,
}

/// Decodes model output into `T`.
pub fn decode<T: StructuredOutput>(raw: &str) -> Result<T, DecodeError> {
    serde_json::from_str(strip_json_fences(raw)).map_err(|e| DecodeError {
        kind: DecodeErrorKind::SchemaMismatch,
        target: T::NAME,
        detail: e.to_string(),
        raw: raw.to_string(),
    })
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
