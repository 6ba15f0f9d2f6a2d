//! End-to-end orchestration: files in, knowledge base or assessment records out.

use std::path::PathBuf;
use std::sync::Arc;

use ct_core::chunking::Chunker;
use ct_core::config::AppConfig;
use ct_core::domain::{AssessmentRecord, Document};
use ct_core::error::AppError;
use ct_core::ingest::{load_documents, LoadOutcome, SkippedDocument, TextExtractor};

use crate::assess::{AssessOptions, AssessmentEngine};
use crate::chat::{self, ChatOptions};
use crate::embeddings::Embedder;
use crate::knowledge::KnowledgeBase;
use crate::llm::Llm;

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub kb: KnowledgeBase,
    pub documents: usize,
    pub chunks: usize,
    pub skipped: Vec<SkippedDocument>,
}

#[derive(Debug, Clone)]
pub struct AuditOutcome {
    /// Completion order.
    pub records: Vec<AssessmentRecord>,
    pub documents: usize,
    pub chunks: usize,
    pub skipped: Vec<SkippedDocument>,
}

pub struct Pipeline {
    config: AppConfig,
    chunker: Chunker,
    extractor: Box<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn Llm>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        extractor: Box<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let chunker = Chunker::from_config(&config.chunking)?;
        Ok(Self {
            config,
            chunker,
            extractor,
            embedder,
            llm,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Load, chunk and embed policy files.
    pub fn train(&self, policy_paths: &[PathBuf]) -> Result<TrainOutcome, AppError> {
        let LoadOutcome { documents, skipped } =
            load_documents(self.extractor.as_ref(), policy_paths);
        let mut out = self.train_documents(&documents)?;
        out.skipped = skipped;
        Ok(out)
    }

    pub fn train_documents(&self, documents: &[Document]) -> Result<TrainOutcome, AppError> {
        let chunks = self.chunker.chunk_documents(documents);
        let kb = KnowledgeBase::build(
            &chunks,
            self.embedder.as_ref(),
            &self.config.ollama.embedding_model,
        )?;
        Ok(TrainOutcome {
            kb,
            documents: documents.len(),
            chunks: chunks.len(),
            skipped: Vec::new(),
        })
    }

    pub fn engine(&self, kb: Arc<KnowledgeBase>) -> AssessmentEngine {
        AssessmentEngine::new(
            kb,
            self.embedder.clone(),
            self.llm.clone(),
            AssessOptions::from_config(&self.config),
        )
    }

    /// Load, chunk and assess evidence files against `kb`.
    pub async fn run_audit(&self, evidence_paths: &[PathBuf], kb: Arc<KnowledgeBase>) -> AuditOutcome {
        let LoadOutcome { documents, skipped } =
            load_documents(self.extractor.as_ref(), evidence_paths);
        let mut out = self.audit_documents(&documents, kb).await;
        out.skipped = skipped;
        out
    }

    pub async fn audit_documents(&self, documents: &[Document], kb: Arc<KnowledgeBase>) -> AuditOutcome {
        let chunks = self.chunker.chunk_documents(documents);
        let chunk_count = chunks.len();
        let records = self.engine(kb).assess(chunks).await;
        AuditOutcome {
            records,
            documents: documents.len(),
            chunks: chunk_count,
            skipped: Vec::new(),
        }
    }

    pub fn ask(
        &self,
        question: &str,
        kb: &KnowledgeBase,
        prior_records: &[AssessmentRecord],
    ) -> Result<String, AppError> {
        chat::answer(
            question,
            kb,
            self.embedder.as_ref(),
            self.llm.as_ref(),
            prior_records,
            &ChatOptions::from_config(&self.config),
        )
    }

    pub fn ask_about_evidence(
        &self,
        question: &str,
        evidence: &str,
        kb: &KnowledgeBase,
        prior_records: &[AssessmentRecord],
    ) -> Result<String, AppError> {
        chat::answer_on_evidence(
            question,
            evidence,
            kb,
            self.embedder.as_ref(),
            self.llm.as_ref(),
            prior_records,
            &ChatOptions::from_config(&self.config),
        )
    }
}
