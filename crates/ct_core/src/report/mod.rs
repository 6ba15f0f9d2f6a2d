use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{sort_by_origin, AssessmentRecord, Verdict};
use crate::error::{codes, AppError};
use crate::normalize::text::sha256_hex;
use crate::normalize::timestamps::filename_safe_timestamp;

/// Workbook columns, in export order. Changing this breaks downstream spreadsheets.
pub const REPORT_COLUMNS: [&str; 5] = [
    "Evidence",
    "Control Statement",
    "Verdict",
    "Rationale",
    "Improvement Suggestion",
];

/// Sheet holding the audit rows in the xlsx workbook.
pub const WORKBOOK_SHEET: &str = "Audit Results";

/// Excel rejects longer cell strings.
const XLSX_MAX_CELL_CHARS: usize = 32_767;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Xlsx => "xlsx",
            ReportFormat::Csv => "csv",
        }
    }

    /// `.csv` paths get CSV; everything else gets a workbook.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ReportFormat::Csv,
            _ => ReportFormat::Xlsx,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Handle to a written workbook; enough to read it back byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportArtifact {
    pub path: String,
    #[serde(default)]
    pub format: ReportFormat,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

impl ReportArtifact {
    /// Read the artifact and confirm it is unchanged since export.
    pub fn read_back(&self) -> Result<Vec<u8>, AppError> {
        let bytes = fs::read(&self.path).map_err(|e| {
            AppError::new(codes::REPORT_WRITE_FAILED, "Failed to read report artifact")
                .with_details(format!("path={}; err={}", self.path, e))
        })?;
        let actual = sha256_hex(&bytes);
        if actual != self.sha256 {
            return Err(AppError::new(
                codes::REPORT_WRITE_FAILED,
                "Report artifact changed since export",
            )
            .with_details(format!(
                "path={}; expected={}; actual={}",
                self.path, self.sha256, actual
            )));
        }
        Ok(bytes)
    }
}

fn empty_report() -> AppError {
    AppError::new(
        codes::REPORT_EMPTY,
        "No assessment records to export; no workbook was produced",
    )
}

fn evidence_cell(r: &AssessmentRecord) -> String {
    let ty = r.evidence_type.trim();
    if ty.is_empty() || ty.eq_ignore_ascii_case("unknown") {
        r.evidence_snippet.clone()
    } else {
        format!("{ty}: {}", r.evidence_snippet)
    }
}

/// One row per record, columns per [`REPORT_COLUMNS`]. Rows keep the input order.
pub fn build_table(records: &[AssessmentRecord]) -> Result<AuditTable, AppError> {
    if records.is_empty() {
        return Err(empty_report());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                evidence_cell(r),
                r.control_statement.clone(),
                r.verdict.as_str().to_string(),
                r.rationale.clone().unwrap_or_default(),
                r.improvement_suggestion.clone().unwrap_or_default(),
            ]
        })
        .collect();
    Ok(AuditTable {
        headers: REPORT_COLUMNS.iter().map(|h| h.to_string()).collect(),
        rows,
    })
}

/// Serialize the table as CSV bytes.
pub fn render_csv(records: &[AssessmentRecord]) -> Result<Vec<u8>, AppError> {
    let table = build_table(records)?;
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(&table.headers).map_err(|e| {
        AppError::new(codes::REPORT_WRITE_FAILED, "Failed to encode report header")
            .with_details(e.to_string())
    })?;
    for row in &table.rows {
        wtr.write_record(row).map_err(|e| {
            AppError::new(codes::REPORT_WRITE_FAILED, "Failed to encode report row")
                .with_details(e.to_string())
        })?;
    }
    wtr.into_inner().map_err(|e| {
        AppError::new(codes::REPORT_WRITE_FAILED, "Failed to finalize report")
            .with_details(e.to_string())
    })
}

fn xlsx_error(message: &str, e: rust_xlsxwriter::XlsxError) -> AppError {
    AppError::new(codes::REPORT_WRITE_FAILED, message).with_details(e.to_string())
}

fn xlsx_cell(s: &str) -> String {
    s.chars().take(XLSX_MAX_CELL_CHARS).collect()
}

/// Serialize the table as a single-sheet xlsx workbook.
pub fn render_xlsx(records: &[AssessmentRecord]) -> Result<Vec<u8>, AppError> {
    let table = build_table(records)?;
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let header = rust_xlsxwriter::Format::new().set_bold();
    {
        let sheet = workbook.add_worksheet();
        sheet
            .set_name(WORKBOOK_SHEET)
            .map_err(|e| xlsx_error("Failed to name report sheet", e))?;
        for (col, h) in table.headers.iter().enumerate() {
            let col = col as u16;
            sheet
                .write_string_with_format(0, col, h.as_str(), &header)
                .map_err(|e| xlsx_error("Failed to encode report header", e))?;
            sheet
                .set_column_width(col, 40)
                .map_err(|e| xlsx_error("Failed to size report column", e))?;
        }
        sheet
            .set_freeze_panes(1, 0)
            .map_err(|e| xlsx_error("Failed to freeze report header", e))?;
        for (i, row) in table.rows.iter().enumerate() {
            let r = (i + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                sheet
                    .write_string(r, col as u16, xlsx_cell(cell))
                    .map_err(|e| xlsx_error("Failed to encode report row", e))?;
            }
        }
    }
    workbook
        .save_to_buffer()
        .map_err(|e| xlsx_error("Failed to finalize report", e))
}

pub fn render(records: &[AssessmentRecord], format: ReportFormat) -> Result<Vec<u8>, AppError> {
    match format {
        ReportFormat::Xlsx => render_xlsx(records),
        ReportFormat::Csv => render_csv(records),
    }
}

/// Write the report to `path` (tmp file, then rename) and return its handle.
///
/// The format follows the extension: `.csv` writes CSV, anything else an xlsx workbook.
pub fn export_report_to(
    records: &[AssessmentRecord],
    path: &Path,
) -> Result<ReportArtifact, AppError> {
    let format = ReportFormat::from_path(path);
    let bytes = render(records, format)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::new(codes::REPORT_WRITE_FAILED, "Failed to create report directory")
                    .with_details(format!("path={}; err={}", parent.display(), e))
            })?;
        }
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes).map_err(|e| {
        AppError::new(codes::REPORT_WRITE_FAILED, "Failed to write report")
            .with_details(format!("path={}; err={}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        AppError::new(codes::REPORT_WRITE_FAILED, "Failed to finalize report write")
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
    })?;

    let artifact = ReportArtifact {
        path: path.display().to_string(),
        format,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
        rows: records.len(),
    };
    tracing::info!(path = %artifact.path, rows = artifact.rows, bytes = artifact.bytes, "audit workbook written");
    Ok(artifact)
}

/// Write the `audit_assessment_<timestamp>.xlsx` workbook into `dir`.
pub fn export_report(
    records: &[AssessmentRecord],
    dir: &Path,
    generated_at: &str,
) -> Result<ReportArtifact, AppError> {
    export_report_as(records, dir, generated_at, ReportFormat::Xlsx)
}

/// Write `audit_assessment_<timestamp>.<ext>` into `dir`.
pub fn export_report_as(
    records: &[AssessmentRecord],
    dir: &Path,
    generated_at: &str,
    format: ReportFormat,
) -> Result<ReportArtifact, AppError> {
    if records.is_empty() {
        return Err(empty_report());
    }
    let name = format!(
        "audit_assessment_{}.{}",
        filename_safe_timestamp(generated_at),
        format.extension()
    );
    export_report_to(records, &PathBuf::from(dir).join(name))
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

/// Deterministic Markdown summary of an audit run.
///
/// Records are sorted by origin so the output is snapshot-testable regardless of
/// completion order.
pub fn render_summary_markdown(records: &[AssessmentRecord]) -> Result<String, AppError> {
    if records.is_empty() {
        return Err(empty_report());
    }
    let mut sorted = records.to_vec();
    sort_by_origin(&mut sorted);

    let mut out = String::new();
    out.push_str("# Control Audit Summary\n\n");
    out.push_str(&format!("Assessed evidence chunks: **{}**\n\n", sorted.len()));

    out.push_str("## Verdicts\n\n");
    out.push_str("| Verdict | Count |\n");
    out.push_str("|---|---:|\n");
    for v in Verdict::ALL {
        let n = sorted.iter().filter(|r| r.verdict == v).count();
        out.push_str(&format!("| {} | {} |\n", v.as_str(), n));
    }
    out.push('\n');

    out.push_str("## Findings (Non-Compliant and Partial)\n\n");
    let mut any = false;
    for r in sorted
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::NonCompliant | Verdict::Partial))
    {
        any = true;
        let control = if r.control_statement.trim().is_empty() {
            "UNKNOWN CONTROL"
        } else {
            r.control_statement.as_str()
        };
        out.push_str(&format!(
            "### {} ({} #{})\n\n",
            md_cell(control),
            md_cell(&r.source),
            r.sequence_index
        ));
        out.push_str(&format!("- Verdict: {}\n", r.verdict));
        if let Some(score) = r.risk_score {
            out.push_str(&format!("- Risk score: {score}/10\n"));
        }
        if let Some(rat) = r.rationale.as_deref() {
            out.push_str(&format!("- Rationale: {}\n", md_cell(rat)));
        }
        if let Some(imp) = r.improvement_suggestion.as_deref() {
            out.push_str(&format!("- Improvement: {}\n", md_cell(imp)));
        }
        out.push('\n');
    }
    if !any {
        out.push_str("- None.\n\n");
    }

    let unknown = sorted
        .iter()
        .filter(|r| r.verdict == Verdict::Unknown)
        .count();
    if unknown > 0 {
        out.push_str("## Needs manual review\n\n");
        out.push_str(&format!(
            "- {unknown} chunk(s) could not be classified; see the Rationale column.\n"
        ));
    }

    Ok(out)
}
