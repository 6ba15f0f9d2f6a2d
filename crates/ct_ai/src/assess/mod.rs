//! Retrieval-augmented compliance assessment of evidence chunks.
//!
//! Every chunk yields exactly one [`AssessmentRecord`]. Evaluator failures, timeouts,
//! malformed responses and panicking workers degrade to an `Unknown` record carrying
//! the error as rationale; they never abort the batch or cancel siblings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ct_core::config::AppConfig;
use ct_core::domain::{AssessmentRecord, Chunk, Policy, Verdict};
use ct_core::error::{codes, AppError};
use ct_core::normalize::text::snippet_first_chars;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::embeddings::Embedder;
use crate::knowledge::{KbHit, KnowledgeBase};
use crate::llm::Llm;
use crate::prompts;

pub mod parse;

pub use parse::{parse_assessment, ParsedAssessment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessOptions {
    /// In-flight units. Zero is treated as one.
    pub concurrency: usize,
    pub top_k: usize,
    /// Per-unit budget covering retrieval and evaluation.
    pub timeout: Duration,
    pub snippet_chars: usize,
    pub model: String,
}

impl Default for AssessOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl AssessOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            concurrency: cfg.assessment.concurrency,
            top_k: cfg.retrieval.top_k,
            timeout: Duration::from_secs(cfg.assessment.timeout_secs),
            snippet_chars: cfg.assessment.snippet_chars,
            model: cfg.ollama.llm_model.clone(),
        }
    }
}

/// Shared, read-only state for one assessment run. Cheap to clone into workers.
#[derive(Clone)]
pub struct AssessmentEngine {
    kb: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn Llm>,
    options: AssessOptions,
}

impl AssessmentEngine {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
        options: AssessOptions,
    ) -> Self {
        Self {
            kb,
            embedder,
            llm,
            options,
        }
    }

    pub fn options(&self) -> &AssessOptions {
        &self.options
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    /// Retrieve, evaluate and parse one chunk on the calling thread.
    pub fn assess_chunk(&self, chunk: &Chunk) -> AssessmentRecord {
        let hits = match self
            .kb
            .query(self.embedder.as_ref(), &chunk.text, self.options.top_k)
        {
            Ok(h) => h,
            Err(e) => return failure_record(chunk, &e, Vec::new(), self.options.snippet_chars),
        };
        let policies = hits.iter().map(KbHit::policy).collect::<Vec<_>>();
        let refs = policy_refs(&policies);

        let prompt = prompts::assessment_prompt(&chunk.text, &prompts::policy_blocks(&policies));
        let parsed = self
            .llm
            .generate(&self.options.model, &prompt)
            .and_then(|resp| parse_assessment(&resp));

        match parsed {
            Ok(p) => {
                let record = success_record(chunk, &p, refs, self.options.snippet_chars);
                tracing::debug!(
                    chunk = %chunk.origin_label(),
                    verdict = %record.verdict,
                    "chunk assessed"
                );
                record
            }
            Err(e) => failure_record(chunk, &e, refs, self.options.snippet_chars),
        }
    }

    /// Assess every chunk with at most `concurrency` units in flight.
    ///
    /// A unit that times out is recorded as `Unknown` right away, but its slot stays
    /// taken until the blocking evaluator call returns.
    ///
    /// Records come back in completion order; use `sort_by_origin` to restore
    /// submission order.
    pub async fn assess(&self, chunks: Vec<Chunk>) -> Vec<AssessmentRecord> {
        if chunks.is_empty() {
            tracing::warn!("no evidence chunks to assess");
            return Vec::new();
        }

        let started = Instant::now();
        let concurrency = self.options.concurrency.max(1);
        let timeout = self.options.timeout;
        let snippet_chars = self.options.snippet_chars;
        tracing::info!(
            chunks = chunks.len(),
            concurrency,
            timeout_secs = timeout.as_secs(),
            "assessing evidence chunks"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut set = JoinSet::new();
        for (slot, chunk) in chunks.iter().cloned().enumerate() {
            let sem = semaphore.clone();
            let engine = self.clone();
            set.spawn(async move {
                let permit = match sem.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => {
                        let err = AppError::new(codes::AI_EVALUATOR_FAILED, "Worker pool closed")
                            .with_details(e.to_string());
                        return (slot, failure_record(&chunk, &err, Vec::new(), snippet_chars));
                    }
                };

                let unit_chunk = chunk.clone();
                // The permit rides with the blocking unit: a timed-out unit keeps its slot
                // until the evaluator call actually returns.
                let unit = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    engine.assess_chunk(&unit_chunk)
                });
                let record = match tokio::time::timeout(timeout, unit).await {
                    Ok(Ok(record)) => record,
                    Ok(Err(join_err)) => {
                        let err = AppError::new(codes::AI_EVALUATOR_FAILED, "Assessment worker failed")
                            .with_details(join_err.to_string());
                        failure_record(&chunk, &err, Vec::new(), snippet_chars)
                    }
                    Err(_) => {
                        let err = AppError::new(
                            codes::AI_EVALUATOR_TIMEOUT,
                            format!("Assessment timed out after {}s", timeout.as_secs_f32()),
                        )
                        .with_retryable(true);
                        failure_record(&chunk, &err, Vec::new(), snippet_chars)
                    }
                };
                (slot, record)
            });
        }

        let mut done = vec![false; chunks.len()];
        let mut records = Vec::with_capacity(chunks.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, record)) => {
                    done[slot] = true;
                    records.push(record);
                }
                Err(e) => tracing::error!(err = %e, "assessment task lost"),
            }
        }

        // A task that panicked outside the blocking unit never reported its slot.
        for (slot, chunk) in chunks.iter().enumerate() {
            if !done[slot] {
                let err = AppError::new(codes::AI_EVALUATOR_FAILED, "Assessment task was lost");
                records.push(failure_record(chunk, &err, Vec::new(), snippet_chars));
            }
        }

        let unknown = records
            .iter()
            .filter(|r| r.verdict == Verdict::Unknown)
            .count();
        tracing::info!(
            records = records.len(),
            unknown,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assessment completed"
        );
        records
    }
}

fn policy_refs(policies: &[Policy]) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for p in policies {
        if !refs.contains(&p.id) {
            refs.push(p.id.clone());
        }
    }
    refs
}

fn success_record(
    chunk: &Chunk,
    parsed: &ParsedAssessment,
    policy_refs: Vec<String>,
    snippet_chars: usize,
) -> AssessmentRecord {
    AssessmentRecord {
        evidence_snippet: snippet_first_chars(&chunk.text, snippet_chars),
        evidence_type: parsed
            .evidence_type
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        verdict: parsed.verdict(),
        control_statement: parsed.control_statement.clone().unwrap_or_default(),
        rationale: parsed.full_rationale(),
        improvement_suggestion: parsed.improvement.clone(),
        risk_score: parsed.risk_score,
        source: chunk.source.clone(),
        origin_document_index: chunk.origin_document_index,
        sequence_index: chunk.sequence_index,
        policy_refs,
    }
}

/// Degraded record for a unit that could not be evaluated.
pub fn failure_record(
    chunk: &Chunk,
    error: &AppError,
    policy_refs: Vec<String>,
    snippet_chars: usize,
) -> AssessmentRecord {
    tracing::warn!(chunk = %chunk.origin_label(), err = %error, "assessment failed; recording Unknown");
    AssessmentRecord {
        evidence_snippet: snippet_first_chars(&chunk.text, snippet_chars),
        evidence_type: "Unknown".to_string(),
        verdict: Verdict::Unknown,
        control_statement: String::new(),
        rationale: Some(format!("Assessment failed: {}", error.describe())),
        improvement_suggestion: None,
        risk_score: None,
        source: chunk.source.clone(),
        origin_document_index: chunk.origin_document_index,
        sequence_index: chunk.sequence_index,
        policy_refs,
    }
}
