//! Caller-owned audit session.
//!
//! The core keeps nothing between calls; whatever a front end needs to remember across
//! steps (where the knowledge base lives, the last run's records, the last workbook,
//! the chat log) travels in an [`AuditSession`] that the caller stores.

use std::fs;
use std::path::Path;

use ct_core::domain::AssessmentRecord;
use ct_core::error::{codes, AppError};
use ct_core::normalize::timestamps::now_rfc3339_utc;
use ct_core::report::ReportArtifact;
use serde::{Deserialize, Serialize};

use crate::chat::ChatHistory;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditSession {
    /// Directory of the saved knowledge base in use.
    #[serde(default)]
    pub kb_dir: Option<String>,
    #[serde(default)]
    pub records: Vec<AssessmentRecord>,
    #[serde(default)]
    pub report: Option<ReportArtifact>,
    #[serde(default)]
    pub chat: ChatHistory,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl AuditSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the previous run's results. Runs supersede each other; they never merge.
    pub fn record_run(
        &mut self,
        records: Vec<AssessmentRecord>,
        report: Option<ReportArtifact>,
    ) -> Result<(), AppError> {
        self.records = records;
        self.report = report;
        self.updated_at = Some(now_rfc3339_utc()?);
        Ok(())
    }

    pub fn set_knowledge_base(&mut self, dir: Option<&Path>) -> Result<(), AppError> {
        self.kb_dir = dir.map(|d| d.display().to_string());
        self.updated_at = Some(now_rfc3339_utc()?);
        Ok(())
    }

    /// A missing file is a fresh session.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|e| {
            AppError::new(codes::SESSION_STORE_FAILED, "Failed to read session")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AppError::new(codes::SESSION_STORE_FAILED, "Failed to decode session")
                .with_details(format!("path={}; err={}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::new(codes::SESSION_STORE_FAILED, "Failed to create session directory")
                        .with_details(format!("path={}; err={}", parent.display(), e))
                })?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            AppError::new(codes::SESSION_STORE_FAILED, "Failed to encode session")
                .with_details(e.to_string())
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json.as_bytes()).map_err(|e| {
            AppError::new(codes::SESSION_STORE_FAILED, "Failed to write session")
                .with_details(format!("path={}; err={}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            AppError::new(codes::SESSION_STORE_FAILED, "Failed to finalize session write")
                .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
        })
    }
}
