//! Tolerant parsing of evaluator responses.
//!
//! Responses are read line by line as `Key: value` fields. Keys match
//! case-insensitively and may be wrapped in markdown bold or bullets. Lines that do not
//! start a known field continue the previous one.

use ct_core::domain::Verdict;
use ct_core::error::{codes, AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ControlStatement,
    Verdict,
    EvidenceType,
    LogEntry,
    Rationale,
    Improvement,
    RiskScore,
}

fn field_for_key(key: &str) -> Option<Field> {
    let key = key
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let f = match key.as_str() {
        "control statement" | "control" | "control tested" => Field::ControlStatement,
        "assessment" | "verdict" | "status" | "compliance" | "compliance status" => Field::Verdict,
        "evidence type" | "type of evidence" | "type" => Field::EvidenceType,
        "log entry" | "failing log entry" => Field::LogEntry,
        "rationale" | "reason" => Field::Rationale,
        "improvements" | "improvement" | "improvement suggestion" | "suggestions"
        | "suggestion" | "recommendations" | "recommendation" | "remediation" => {
            Field::Improvement
        }
        "risk score" | "risk" => Field::RiskScore,
        _ => return None,
    };
    Some(f)
}

/// Fields recovered from one evaluator response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAssessment {
    pub control_statement: Option<String>,
    /// `None` when the response carried no verdict field at all.
    pub verdict_text: Option<String>,
    pub evidence_type: Option<String>,
    pub log_entry: Option<String>,
    pub rationale: Option<String>,
    pub improvement: Option<String>,
    pub risk_score: Option<u8>,
}

impl ParsedAssessment {
    pub fn verdict(&self) -> Verdict {
        self.verdict_text
            .as_deref()
            .map(Verdict::from_text)
            .unwrap_or(Verdict::Unknown)
    }

    /// Rationale with the failing log entry appended. Non-Compliant verdicts always get one.
    pub fn full_rationale(&self) -> Option<String> {
        let combined = match (self.rationale.as_deref(), self.log_entry.as_deref()) {
            (Some(r), Some(l)) => Some(format!("{r}\nLog entry: {l}")),
            (Some(r), None) => Some(r.to_string()),
            (None, Some(l)) => Some(format!("Log entry: {l}")),
            (None, None) => None,
        };
        if combined.is_none() && self.verdict() == Verdict::NonCompliant {
            return Some("Evaluator gave no rationale for the Non-Compliant verdict".to_string());
        }
        combined
    }
}

fn strip_decoration(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['-', '*', '•', '#', '>'])
        .trim_start()
}

/// Filler answers that mean "no value".
fn is_placeholder(v: &str) -> bool {
    let t = v.trim().trim_end_matches('.').to_lowercase();
    t.is_empty() || matches!(t.as_str(), "n/a" | "na" | "none" | "-" | "not applicable")
}

fn parse_risk(v: &str) -> Option<u8> {
    let digits = v
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>();
    digits
        .parse::<u8>()
        .ok()
        .filter(|n| (1..=10).contains(n))
}

pub fn parse_assessment(response: &str) -> Result<ParsedAssessment, AppError> {
    if response.trim().is_empty() {
        return Err(AppError::new(
            codes::AI_EVALUATOR_MALFORMED,
            "Evaluator response was empty",
        ));
    }

    let mut fields: Vec<(Field, String)> = Vec::new();
    for raw in response.lines() {
        let line = strip_decoration(raw);
        if line.is_empty() {
            continue;
        }

        let started = line.split_once(':').and_then(|(k, v)| {
            field_for_key(k.trim_matches(|c: char| c == '*' || c == '_' || c.is_whitespace()))
                .map(|f| (f, v.trim().trim_start_matches(['*', '_']).trim()))
        });

        match started {
            Some((field, value)) => fields.push((field, value.to_string())),
            None => {
                if let Some((_, value)) = fields.last_mut() {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(line);
                }
            }
        }
    }

    if fields.is_empty() {
        return Err(AppError::new(
            codes::AI_EVALUATOR_MALFORMED,
            "Evaluator response had no recognizable fields",
        )
        .with_details(format!(
            "response_prefix={}",
            ct_core::normalize::text::snippet_first_chars(response, 120)
        )));
    }

    // First occurrence of each field wins.
    let mut out = ParsedAssessment::default();
    for (field, value) in fields {
        let value = value.trim().to_string();
        let slot = match field {
            Field::ControlStatement => &mut out.control_statement,
            Field::Verdict => &mut out.verdict_text,
            Field::EvidenceType => &mut out.evidence_type,
            Field::LogEntry => &mut out.log_entry,
            Field::Rationale => &mut out.rationale,
            Field::Improvement => &mut out.improvement,
            Field::RiskScore => {
                if out.risk_score.is_none() {
                    out.risk_score = parse_risk(&value);
                }
                continue;
            }
        };
        if slot.is_none() && (field == Field::Verdict || !is_placeholder(&value)) {
            *slot = Some(value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_the_plain_field_format() {
        let p = parse_assessment(
            "Control Statement: Access Control\nAssessment: Non-Compliant\nEvidence Type: DB log\nRationale: repeated failures",
        )
        .expect("parse");
        assert_eq!(p.control_statement.as_deref(), Some("Access Control"));
        assert_eq!(p.verdict(), Verdict::NonCompliant);
        assert_eq!(p.evidence_type.as_deref(), Some("DB log"));
        assert_eq!(p.full_rationale().as_deref(), Some("repeated failures"));
        assert_eq!(p.improvement, None);
    }

    #[test]
    fn tolerates_markdown_and_continuation_lines() {
        let p = parse_assessment(
            "Here is my review.\n\n- **Control Statement:** AC-7 Unsuccessful logon attempts\n**Verdict**: partially compliant\n* Improvements: enable lockout\n  and alert on bursts\nRisk Score: 7/10",
        )
        .expect("parse");
        assert_eq!(
            p.control_statement.as_deref(),
            Some("AC-7 Unsuccessful logon attempts")
        );
        assert_eq!(p.verdict(), Verdict::Partial);
        assert_eq!(
            p.improvement.as_deref(),
            Some("enable lockout\nand alert on bursts")
        );
        assert_eq!(p.risk_score, Some(7));
    }

    #[test]
    fn missing_verdict_defaults_to_unknown() {
        let p = parse_assessment("Control Statement: Encryption at rest").expect("parse");
        assert_eq!(p.verdict(), Verdict::Unknown);
        assert_eq!(p.full_rationale(), None);
    }

    #[test]
    fn log_entry_joins_rationale_and_placeholders_are_dropped() {
        let p = parse_assessment(
            "Assessment: Non-Compliant\nLog Entry: 03:12 admin login failed\nRationale: N/A\nImprovements: None",
        )
        .expect("parse");
        assert_eq!(
            p.full_rationale().as_deref(),
            Some("Log entry: 03:12 admin login failed")
        );
        assert_eq!(p.improvement, None);
    }

    #[test]
    fn non_compliant_without_rationale_gets_placeholder() {
        let p = parse_assessment("Assessment: NOT compliant").expect("parse");
        assert_eq!(p.verdict(), Verdict::NonCompliant);
        assert!(p.full_rationale().is_some());
    }

    #[test]
    fn unstructured_or_empty_responses_are_malformed() {
        let err = parse_assessment("I cannot help with that.").expect_err("malformed");
        assert_eq!(err.code, codes::AI_EVALUATOR_MALFORMED);
        let err = parse_assessment("  \n ").expect_err("empty");
        assert_eq!(err.code, codes::AI_EVALUATOR_MALFORMED);
    }

    #[test]
    fn out_of_range_risk_is_ignored() {
        let p = parse_assessment("Assessment: Compliant\nRisk Score: 42").expect("parse");
        assert_eq!(p.risk_score, None);
        assert_eq!(p.verdict(), Verdict::Compliant);
    }
}
