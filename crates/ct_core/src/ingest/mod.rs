//! Turning uploaded files into [`Document`]s.
//!
//! Extraction failures are isolated per file: [`load_documents`] records the failure and
//! moves on, so one unreadable screenshot never sinks a whole upload batch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::Document;
use crate::error::AppError;

pub mod files;

pub use files::{FileExtractor, OcrEngine};

/// `extract(file) -> text | ExtractionError`.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Document, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedDocument {
    pub path: String,
    pub error: AppError,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedDocument>,
}

/// Extract every path in order. Files that fail extraction land in `skipped`.
pub fn load_documents(extractor: &dyn TextExtractor, paths: &[PathBuf]) -> LoadOutcome {
    let mut out = LoadOutcome::default();
    for path in paths {
        match extractor.extract(path) {
            Ok(doc) => {
                tracing::debug!(
                    path = %path.display(),
                    chars = doc.text.len(),
                    "extracted document"
                );
                out.documents.push(doc);
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "document extraction failed; skipping");
                out.skipped.push(SkippedDocument {
                    path: path.display().to_string(),
                    error,
                });
            }
        }
    }
    tracing::info!(
        loaded = out.documents.len(),
        skipped = out.skipped.len(),
        "documents loaded"
    );
    out
}
