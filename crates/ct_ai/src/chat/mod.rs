//! Question answering grounded in the knowledge base and prior assessment results.
//!
//! `answer` and `answer_on_evidence` are stateless: the same question, knowledge base,
//! records and evaluator give the same prompt every time. Conversation history is owned
//! by the caller.

use std::path::Path;

use ct_core::config::AppConfig;
use ct_core::domain::{AssessmentRecord, Policy};
use ct_core::error::{codes, AppError};
use ct_core::normalize::text::snippet_first_chars;
use ct_core::normalize::timestamps::now_rfc3339_utc;
use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;
use crate::knowledge::{KbHit, KnowledgeBase};
use crate::llm::Llm;
use crate::prompts;

/// Upper bound on each record's share of the prompt.
const RECORD_SUMMARY_CHARS: usize = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOptions {
    pub top_k: usize,
    /// Leading prior records summarized into the prompt.
    pub context_records: usize,
    pub model: String,
}

impl ChatOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            top_k: cfg.chat.top_k,
            context_records: cfg.chat.context_records,
            model: cfg.ollama.llm_model.clone(),
        }
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

fn summarize_record(r: &AssessmentRecord) -> String {
    let mut s = format!(
        "Control Statement: {}\nAssessment: {}\nEvidence Type: {}\nEvidence: {}",
        r.control_statement, r.verdict, r.evidence_type, r.evidence_snippet
    );
    if let Some(rat) = r.rationale.as_deref() {
        s.push_str(&format!("\nRationale: {rat}"));
    }
    if let Some(imp) = r.improvement_suggestion.as_deref() {
        s.push_str(&format!("\nImprovements: {imp}"));
    }
    snippet_first_chars(&s, RECORD_SUMMARY_CHARS)
}

/// Bounded summary of the first `n` records, in the order given.
pub fn assessment_context(records: &[AssessmentRecord], n: usize) -> String {
    summarize_first(records.iter(), n)
}

fn summarize_first<'a>(records: impl Iterator<Item = &'a AssessmentRecord>, n: usize) -> String {
    let parts = records.take(n).map(summarize_record).collect::<Vec<_>>();
    if parts.is_empty() {
        return "(no assessment results yet)".to_string();
    }
    parts.join("\n\n")
}

fn file_name(s: &str) -> &str {
    Path::new(s)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(s)
}

/// Records assessed from one evidence file, matched on the full source or its file name.
pub fn records_for_evidence<'a>(
    records: &'a [AssessmentRecord],
    evidence: &str,
) -> Vec<&'a AssessmentRecord> {
    let evidence = evidence.trim();
    records
        .iter()
        .filter(|r| r.source == evidence || file_name(&r.source) == file_name(evidence))
        .collect()
}

fn non_empty_question(question: &str) -> Result<&str, AppError> {
    let q = question.trim();
    if q.is_empty() {
        return Err(AppError::new(
            codes::CHAT_QUESTION_EMPTY,
            "Question must not be empty",
        ));
    }
    Ok(q)
}

pub fn answer(
    question: &str,
    kb: &KnowledgeBase,
    embedder: &dyn Embedder,
    llm: &dyn Llm,
    prior_records: &[AssessmentRecord],
    options: &ChatOptions,
) -> Result<String, AppError> {
    let q = non_empty_question(question)?;

    let hits = kb.query(embedder, q, options.top_k)?;
    let policies = hits.iter().map(KbHit::policy).collect::<Vec<_>>();
    let prompt = prompts::chat_prompt(
        q,
        &prompts::policy_blocks(&policies),
        &assessment_context(prior_records, options.context_records),
    );

    let response = llm.generate(&options.model, &prompt)?;
    tracing::debug!(
        policies = policies.len(),
        records = prior_records.len().min(options.context_records),
        "chat answer generated"
    );
    Ok(response.trim().to_string())
}

/// Answer a question about one evidence file and the policies it was matched to.
///
/// Policy context comes from the `policy_refs` of that file's records; when none of them
/// resolve in `kb`, it falls back to retrieval on the question.
pub fn answer_on_evidence(
    question: &str,
    evidence: &str,
    kb: &KnowledgeBase,
    embedder: &dyn Embedder,
    llm: &dyn Llm,
    prior_records: &[AssessmentRecord],
    options: &ChatOptions,
) -> Result<String, AppError> {
    let q = non_empty_question(question)?;
    let matched = records_for_evidence(prior_records, evidence);
    if matched.is_empty() {
        return Err(AppError::new(
            codes::CHAT_EVIDENCE_UNKNOWN,
            "No assessment results for this evidence file",
        )
        .with_details(format!("evidence={}", evidence.trim())));
    }

    let mut refs: Vec<String> = Vec::new();
    for r in &matched {
        for id in &r.policy_refs {
            if !refs.contains(id) {
                refs.push(id.clone());
            }
        }
    }
    let mut policies = kb.policies_by_ids(&refs);
    if policies.is_empty() {
        tracing::debug!(evidence = %evidence.trim(), "no matched policy in knowledge base; retrieving by question");
        policies = kb
            .query(embedder, q, options.top_k)?
            .iter()
            .map(KbHit::policy)
            .collect::<Vec<Policy>>();
    }

    let prompt = prompts::evidence_chat_prompt(
        q,
        evidence.trim(),
        &prompts::policy_blocks(&policies),
        &summarize_first(matched.iter().copied(), options.context_records),
    );
    let response = llm.generate(&options.model, &prompt)?;
    tracing::debug!(
        evidence = %evidence.trim(),
        policies = policies.len(),
        records = matched.len().min(options.context_records),
        "evidence chat answer generated"
    );
    Ok(response.trim().to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub asked_at: String,
}

/// Append-only (question, answer) log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) -> Result<(), AppError> {
        self.turns.push(ChatTurn {
            question: question.into(),
            answer: answer.into(),
            asked_at: now_rfc3339_utc()?,
        });
        Ok(())
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Newest first, the way the chat panel shows it.
    pub fn latest_first(&self) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
