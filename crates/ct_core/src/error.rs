use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes. Callers match on these to decide which pipeline step to disable.
pub mod codes {
    /// A single file failed text extraction. Isolated per document.
    pub const EXTRACTION_FAILED: &str = "EXTRACTION_FAILED";
    /// The file type has no extractor (or no OCR engine for images).
    pub const EXTRACTION_UNSUPPORTED: &str = "EXTRACTION_UNSUPPORTED";
    /// No usable chunk survived filtering; the knowledge base cannot be built.
    pub const KB_EMPTY_INPUT: &str = "KB_EMPTY_INPUT";
    /// A persisted knowledge base is missing, incompatible, or damaged.
    pub const KB_INDEX_CORRUPT: &str = "KB_INDEX_CORRUPT";
    pub const KB_STORE_FAILED: &str = "KB_STORE_FAILED";
    pub const AI_EMBEDDINGS_FAILED: &str = "AI_EMBEDDINGS_FAILED";
    pub const AI_RETRIEVAL_FAILED: &str = "AI_RETRIEVAL_FAILED";
    pub const AI_EVALUATOR_FAILED: &str = "AI_EVALUATOR_FAILED";
    pub const AI_EVALUATOR_TIMEOUT: &str = "AI_EVALUATOR_TIMEOUT";
    pub const AI_EVALUATOR_MALFORMED: &str = "AI_EVALUATOR_MALFORMED";
    pub const AI_REMOTE_NOT_ALLOWED: &str = "AI_REMOTE_NOT_ALLOWED";
    pub const AI_OLLAMA_UNHEALTHY: &str = "AI_OLLAMA_UNHEALTHY";
    pub const AI_OLLAMA_UNREACHABLE: &str = "AI_OLLAMA_UNREACHABLE";
    /// No assessment records to export.
    pub const REPORT_EMPTY: &str = "REPORT_EMPTY";
    pub const REPORT_WRITE_FAILED: &str = "REPORT_WRITE_FAILED";
    pub const CHAT_QUESTION_EMPTY: &str = "CHAT_QUESTION_EMPTY";
    /// The chosen evidence file has no records in the current audit run.
    pub const CHAT_EVIDENCE_UNKNOWN: &str = "CHAT_EVIDENCE_UNKNOWN";
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const SESSION_STORE_FAILED: &str = "SESSION_STORE_FAILED";
}

/// Single structured error shape used across the pipeline and surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// Message plus details, for places that keep the error as plain text (record rationales).
    pub fn describe(&self) -> String {
        match self.details.as_deref() {
            Some(d) if !d.is_empty() => format!("{self} ({d})"),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
