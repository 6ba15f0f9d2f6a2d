use ct_core::domain::Policy;

/// Render matched policies as labelled blocks, best match first.
pub fn policy_blocks(policies: &[Policy]) -> String {
    if policies.is_empty() {
        return "(no matching policy context)".to_string();
    }
    policies
        .iter()
        .map(|p| format!("[{}]\n{}", p.id, p.description))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn assessment_prompt(evidence: &str, policy_context: &str) -> String {
    // The parser keys off the field labels in the Output block; keep them in sync.
    format!(
        r#"You are an information security auditor.

Evidence snippet:
{evidence}

Policy/report context:
{policy_context}

Tasks:
1) Identify the type of evidence (e.g. DB log, password log, screenshot, config).
2) Assess its compliance with the policy context and SOC2/CRI.
3) Provide the control statement against which the evidence is tested.
4) If the evidence is not compliant, answer Non-Compliant, quote the log entry where it fails the control, and explain why.
5) If only part of the control is met, answer Partial.
6) If compliant, answer Compliant with no further details.
7) Suggest improvements or remedies where applicable. If remedies are already evident in the logs, point them out.

Output (one field per line, exactly these labels):
Control Statement: <control statement>
Assessment: <Compliant/Non-Compliant/Partial>
Evidence Type: <evidence type>
Log Entry: <if Non-Compliant, log entry where it fails>
Rationale: <if Non-Compliant, rationale for failure>
Improvements: <if applicable, suggestions for improvement/remedy measures>
Risk Score: <optional, 1-10>
"#
    )
}

pub fn chat_prompt(question: &str, policy_context: &str, assessment_context: &str) -> String {
    format!(
        r#"You are an information security audit assistant.

User question:
{question}

Policy/report context:
{policy_context}

Assessment context:
{assessment_context}

Answer in a clear and concise way. If the context does not cover the question, say so.
"#
    )
}

pub fn evidence_chat_prompt(
    question: &str,
    evidence: &str,
    policy_context: &str,
    assessment_context: &str,
) -> String {
    format!(
        r#"You are an information security audit assistant.

The user is asking about the evidence file "{evidence}" and the policy it was assessed against.

User question:
{question}

Matched policy context:
{policy_context}

Assessment of this evidence:
{assessment_context}

Answer in a clear and concise way, based only on this evidence and policy. If they do not cover the question, say so.
"#
    )
}
