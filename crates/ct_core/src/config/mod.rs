//! Pipeline configuration.
//!
//! Lives in `controltester.toml` next to the working directory by default.
//! CLI flags override file values, which override the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{codes, AppError};

pub const CONFIG_FILE_NAME: &str = "controltester.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub assessment: AssessmentConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[chunking]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    64
}

/// `[retrieval]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

/// `[assessment]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssessmentConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-chunk budget covering retrieval and evaluation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_snippet_chars() -> usize {
    300
}

/// `[chat]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatConfig {
    /// How many prior assessment records are summarized into the prompt.
    #[serde(default = "default_context_records")]
    pub context_records: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_records: default_context_records(),
            top_k: default_top_k(),
        }
    }
}

fn default_context_records() -> usize {
    3
}

/// `[ollama]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OllamaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub llm_model: String,
    #[serde(default = "default_model")]
    pub embedding_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            llm_model: default_model(),
            embedding_model: default_model(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".into()
}
fn default_model() -> String {
    "llama2".into()
}

/// `[storage]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    #[serde(default = "default_kb_dir")]
    pub kb_dir: String,
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kb_dir: default_kb_dir(),
            report_dir: default_report_dir(),
        }
    }
}

fn default_kb_dir() -> String {
    "saved_kb_vectorstore".into()
}
fn default_report_dir() -> String {
    "reports".into()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunking.chunk_size == 0 {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "chunking.chunk_size must be greater than zero",
            ));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "chunking.overlap must be smaller than chunking.chunk_size",
            )
            .with_details(format!(
                "chunk_size={}; overlap={}",
                self.chunking.chunk_size, self.chunking.overlap
            )));
        }
        if self.retrieval.top_k == 0 || self.chat.top_k == 0 {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "top_k must be a positive integer",
            ));
        }
        if self.assessment.timeout_secs == 0 {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "assessment.timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Load config from `path`. A missing file yields defaults; a malformed one is an error.
pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::new(codes::CONFIG_INVALID, "Failed to read config file")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        AppError::new(codes::CONFIG_INVALID, "Failed to parse config file")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}

pub fn render_default_config() -> Result<String, AppError> {
    toml::to_string_pretty(&AppConfig::default()).map_err(|e| {
        AppError::new(codes::CONFIG_INVALID, "Failed to encode default config")
            .with_details(e.to_string())
    })
}
