pub mod anthropic;
pub mod breakdown;
pub mod ingest;

use std::future::Future;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no API key configured")]
    MissingKey,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no text in service response")]
    EmptyResponse,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected a JSON array, got {0}")]
    NotAnArray(&'static str),
    #[error("input of {chars} characters exceeds the {max} character limit")]
    InputTooLong { chars: usize, max: usize },
    #[error("{0}")]
    Keyring(String),
}

/// One call to the extraction service.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    /// What the service should do and which JSON shape to answer with.
    pub instruction: &'a str,
    /// The user's text.
    pub prompt: &'a str,
    /// Current time, for resolving relative dates.
    pub now: Option<&'a str>,
}

/// A natural-language extraction service. Returns the model's raw text; the
/// caller validates its shape.
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        request: ExtractRequest<'_>,
    ) -> impl Future<Output = Result<String, ExtractError>> + Send;
}

/// Whether the service's answer was used or the pipeline degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    Extracted(Vec<T>),
    Fallback(String),
}

impl<T> Extraction<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// How the client lists tasks, which decides the order creation calls are
/// issued in so a batch reads top to bottom as the service returned it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayOrder {
    /// Most recently created first.
    #[default]
    NewestFirst,
    OldestFirst,
}

impl DisplayOrder {
    pub fn creation_sequence<T>(self, mut items: Vec<T>) -> Vec<T> {
        if self == Self::NewestFirst {
            items.reverse();
        }
        items
    }
}

/// Strip Markdown code fences the model sometimes wraps JSON in.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse the service text as a JSON array, rejecting any other shape.
pub fn parse_array(text: &str) -> Result<Vec<Value>, ExtractError> {
    match serde_json::from_str::<Value>(strip_code_fences(text))? {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Err(ExtractError::NotAnArray("object")),
        Value::String(_) => Err(ExtractError::NotAnArray("string")),
        Value::Number(_) => Err(ExtractError::NotAnArray("number")),
        Value::Bool(_) => Err(ExtractError::NotAnArray("bool")),
        Value::Null => Err(ExtractError::NotAnArray("null")),
    }
}
