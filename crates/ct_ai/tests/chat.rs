use std::sync::Mutex;

use ct_ai::chat::{
    answer, answer_on_evidence, assessment_context, records_for_evidence, ChatHistory, ChatOptions,
};
use ct_ai::embeddings::HashingEmbedder;
use ct_ai::knowledge::KnowledgeBase;
use ct_ai::llm::Llm;
use ct_core::domain::{AssessmentRecord, Chunk, Verdict};
use ct_core::error::{codes, AppError};
use pretty_assertions::assert_eq;

/// Echoes a digest of the prompt and remembers every prompt it saw.
#[derive(Default)]
struct RecordingLlm {
    prompts: Mutex<Vec<String>>,
}

impl Llm for RecordingLlm {
    fn generate(&self, _model: &str, prompt: &str) -> Result<String, AppError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_string());
        }
        Ok(format!(
            "  Answer based on {} prompt bytes.\n",
            prompt.len()
        ))
    }
}

fn kb() -> KnowledgeBase {
    let chunks = [
        "AC-7: Lock accounts after five failed logins.",
        "IA-5: Rotate passwords every 90 days.",
    ]
    .iter()
    .enumerate()
    .map(|(i, t)| Chunk {
        text: t.to_string(),
        source: "policy.txt".to_string(),
        origin_document_index: 0,
        sequence_index: i as u32,
        start_offset: 0,
    })
    .collect::<Vec<_>>();
    KnowledgeBase::build(&chunks, &HashingEmbedder::default(), "hashing").expect("kb")
}

fn record(seq: u32, control: &str) -> AssessmentRecord {
    AssessmentRecord {
        evidence_snippet: format!("login failed #{seq}"),
        evidence_type: "DB log".to_string(),
        verdict: Verdict::NonCompliant,
        control_statement: control.to_string(),
        rationale: Some("no lockout".to_string()),
        improvement_suggestion: None,
        risk_score: None,
        source: "db.log".to_string(),
        origin_document_index: 0,
        sequence_index: seq,
        policy_refs: Vec::new(),
    }
}

#[test]
fn answering_twice_is_byte_identical() {
    let kb = kb();
    let llm = RecordingLlm::default();
    let records = vec![record(0, "Access Control")];
    let opts = ChatOptions::default();

    let a = answer("How often must passwords rotate?", &kb, &HashingEmbedder::default(), &llm, &records, &opts)
        .expect("answer");
    let b = answer("How often must passwords rotate?", &kb, &HashingEmbedder::default(), &llm, &records, &opts)
        .expect("answer");
    assert_eq!(a, b);
    assert!(a.starts_with("Answer based on"));

    let prompts = llm.prompts.lock().expect("lock");
    assert_eq!(prompts[0], prompts[1]);
    assert!(prompts[0].contains("How often must passwords rotate?"));
    assert!(prompts[0].contains("[IA-5]"));
}

#[test]
fn only_the_first_records_reach_the_prompt() {
    let records = (0..5)
        .map(|i| record(i, &format!("Control {i}")))
        .collect::<Vec<_>>();
    let ctx = assessment_context(&records, 3);
    assert!(ctx.contains("Control 0"));
    assert!(ctx.contains("Control 2"));
    assert!(!ctx.contains("Control 3"));
    assert_eq!(assessment_context(&[], 3), "(no assessment results yet)");
}

#[test]
fn blank_questions_are_rejected() {
    let err = answer(
        " \t",
        &kb(),
        &HashingEmbedder::default(),
        &RecordingLlm::default(),
        &[],
        &ChatOptions::default(),
    )
    .expect_err("blank");
    assert_eq!(err.code, codes::CHAT_QUESTION_EMPTY);
}

#[test]
fn history_is_append_only_and_shown_newest_first() {
    let mut history = ChatHistory::default();
    history.push("q1", "a1").expect("push");
    history.push("q2", "a2").expect("push");
    assert_eq!(history.len(), 2);
    assert_eq!(history.turns()[0].question, "q1");
    let newest = history.latest_first().map(|t| t.answer.as_str()).collect::<Vec<_>>();
    assert_eq!(newest, vec!["a2", "a1"]);
}

fn evidence_record(source: &str, control: &str, refs: &[&str]) -> AssessmentRecord {
    AssessmentRecord {
        source: source.to_string(),
        policy_refs: refs.iter().map(|r| r.to_string()).collect(),
        ..record(0, control)
    }
}

fn mixed_records() -> Vec<AssessmentRecord> {
    vec![
        evidence_record("uploads/db.log", "Password Rotation", &["IA-5"]),
        evidence_record("web.log", "Web Lockout", &["AC-7"]),
        evidence_record("uploads/db.log", "Password Rotation", &["IA-5"]),
    ]
}

#[test]
fn evidence_records_match_on_path_or_file_name() {
    let records = mixed_records();
    assert_eq!(records_for_evidence(&records, "db.log").len(), 2);
    assert_eq!(records_for_evidence(&records, "uploads/db.log").len(), 2);
    assert_eq!(records_for_evidence(&records, "web.log").len(), 1);
    assert!(records_for_evidence(&records, "other.log").is_empty());
}

#[test]
fn evidence_chat_is_scoped_and_idempotent() {
    let kb = kb();
    let llm = RecordingLlm::default();
    let records = mixed_records();
    let opts = ChatOptions::default();
    let embedder = HashingEmbedder::default();

    let a = answer_on_evidence("Why was this flagged?", "db.log", &kb, &embedder, &llm, &records, &opts)
        .expect("answer");
    let b = answer_on_evidence("Why was this flagged?", "db.log", &kb, &embedder, &llm, &records, &opts)
        .expect("answer");
    assert_eq!(a, b);

    let prompts = llm.prompts.lock().expect("lock");
    assert_eq!(prompts[0], prompts[1]);
    assert!(prompts[0].contains("db.log"));
    assert!(prompts[0].contains("[IA-5]"));
    assert!(!prompts[0].contains("[AC-7]"));
    assert!(prompts[0].contains("Password Rotation"));
    assert!(!prompts[0].contains("Web Lockout"));
}

#[test]
fn unresolved_policy_refs_fall_back_to_retrieval() {
    let llm = RecordingLlm::default();
    let records = vec![evidence_record("fw.conf", "Firewall", &["SC-7"])];
    answer_on_evidence(
        "Is the firewall rule compliant?",
        "fw.conf",
        &kb(),
        &HashingEmbedder::default(),
        &llm,
        &records,
        &ChatOptions::default(),
    )
    .expect("answer");

    let prompts = llm.prompts.lock().expect("lock");
    assert!(prompts[0].contains("[AC-7]") || prompts[0].contains("[IA-5]"));
    assert!(!prompts[0].contains("(no matching policy context)"));
}

#[test]
fn evidence_outside_the_last_run_is_rejected() {
    let err = answer_on_evidence(
        "What happened?",
        "missing.log",
        &kb(),
        &HashingEmbedder::default(),
        &RecordingLlm::default(),
        &mixed_records(),
        &ChatOptions::default(),
    )
    .expect_err("unknown evidence");
    assert_eq!(err.code, codes::CHAT_EVIDENCE_UNKNOWN);
}
