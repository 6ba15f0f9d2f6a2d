use serde::{Deserialize, Serialize};
use std::fmt;

/// Plain-text rendition of one uploaded file.
///
/// Created by the loader and consumed by the chunker; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// Usually the uploaded filename.
    pub source: String,
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Bounded segment of a document's text; the unit of embedding and evaluation.
///
/// `start_offset` is the byte offset of `text` inside the source document, which lets
/// overlapping chunks be stitched back together exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub origin_document_index: u32,
    pub sequence_index: u32,
    pub start_offset: usize,
}

impl Chunk {
    /// `doc#seq`, used in logs and failure rationales.
    pub fn origin_label(&self) -> String {
        format!(
            "{}#{}:{}",
            self.source, self.origin_document_index, self.sequence_index
        )
    }
}

/// A control matched from the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    pub id: String,
    pub description: String,
}

impl Policy {
    /// Derive a policy from a knowledge-base chunk.
    ///
    /// Policy documents usually lead with an identifier (`AC-2: Account management ...`,
    /// `CC6.1 - Logical access ...`). When the first line carries a short identifier it
    /// becomes the id; otherwise the id falls back to the chunk origin.
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let trimmed = chunk.text.trim();
        let first_line = trimmed.lines().next().unwrap_or("").trim();

        let split = first_line
            .split_once(':')
            .or_else(|| first_line.split_once(" - "));
        if let Some((head, _)) = split {
            let head = head.trim().trim_start_matches(['#', '*', '-', ' ']).trim();
            if looks_like_policy_id(head) {
                return Self {
                    id: head.to_string(),
                    description: trimmed.to_string(),
                };
            }
        }

        Self {
            id: format!("{}#{}", chunk.source, chunk.sequence_index),
            description: trimmed.to_string(),
        }
    }
}

fn looks_like_policy_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 40
        && s.split_whitespace().count() <= 4
        && s.chars().any(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verdict {
    Compliant,
    #[serde(rename = "Non-Compliant")]
    NonCompliant,
    Partial,
    Unknown,
}

impl Verdict {
    pub const ALL: [Verdict; 4] = [
        Verdict::Compliant,
        Verdict::NonCompliant,
        Verdict::Partial,
        Verdict::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Compliant => "Compliant",
            Verdict::NonCompliant => "Non-Compliant",
            Verdict::Partial => "Partial",
            Verdict::Unknown => "Unknown",
        }
    }

    /// Classify free-form verdict text. Negative forms are checked first because
    /// "non-compliant" contains "compliant".
    pub fn from_text(text: &str) -> Self {
        let t = text.trim().to_lowercase();
        if t.contains("non-compliant")
            || t.contains("non compliant")
            || t.contains("noncompliant")
            || t.contains("not compliant")
        {
            Verdict::NonCompliant
        } else if t.contains("partial") {
            Verdict::Partial
        } else if t.contains("compliant") {
            Verdict::Compliant
        } else {
            Verdict::Unknown
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured verdict for one evidence chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssessmentRecord {
    pub evidence_snippet: String,
    pub evidence_type: String,
    pub verdict: Verdict,
    pub control_statement: String,
    /// Present whenever the verdict is Non-Compliant or the evaluation failed.
    pub rationale: Option<String>,
    pub improvement_suggestion: Option<String>,
    /// Optional 1-10 risk rating when the evaluator supplies one.
    #[serde(default)]
    pub risk_score: Option<u8>,

    pub source: String,
    pub origin_document_index: u32,
    pub sequence_index: u32,
    /// Ids of the policies handed to the evaluator as context.
    #[serde(default)]
    pub policy_refs: Vec<String>,
}

/// Restore submission order after concurrent assessment.
pub fn sort_by_origin(records: &mut [AssessmentRecord]) {
    records.sort_by_key(|r| (r.origin_document_index, r.sequence_index));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source: "policy.txt".to_string(),
            origin_document_index: 0,
            sequence_index: 4,
            start_offset: 0,
        }
    }

    #[test]
    fn verdict_text_checks_negative_forms_first() {
        assert_eq!(Verdict::from_text("Non-Compliant"), Verdict::NonCompliant);
        assert_eq!(Verdict::from_text("NOT COMPLIANT"), Verdict::NonCompliant);
        assert_eq!(Verdict::from_text("partially compliant"), Verdict::Partial);
        assert_eq!(Verdict::from_text(" Compliant."), Verdict::Compliant);
        assert_eq!(Verdict::from_text("n/a"), Verdict::Unknown);
    }

    #[test]
    fn policy_id_comes_from_leading_identifier() {
        let p = Policy::from_chunk(&chunk("AC-2: Accounts are reviewed quarterly."));
        assert_eq!(p.id, "AC-2");

        let p = Policy::from_chunk(&chunk("CC6.1 - Logical access is restricted."));
        assert_eq!(p.id, "CC6.1");
    }

    #[test]
    fn policy_id_falls_back_to_origin() {
        let p = Policy::from_chunk(&chunk(
            "all employees must use multi factor authentication when connecting: always",
        ));
        assert_eq!(p.id, "policy.txt#4");
    }
}
