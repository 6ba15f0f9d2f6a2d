use ct_core::domain::{AssessmentRecord, Verdict};
use ct_core::error::codes;
use std::io::Cursor;

use calamine::{Reader, Xlsx};
use ct_core::report::{
    build_table, export_report, export_report_as, export_report_to, render_summary_markdown,
    ReportFormat, REPORT_COLUMNS, WORKBOOK_SHEET,
};
use pretty_assertions::assert_eq;

fn record(doc: u32, seq: u32, verdict: Verdict) -> AssessmentRecord {
    AssessmentRecord {
        evidence_snippet: format!("2026-01-04 login failed (chunk {seq})"),
        evidence_type: "DB log".to_string(),
        verdict,
        control_statement: "Access Control".to_string(),
        rationale: match verdict {
            Verdict::NonCompliant => Some("repeated failures, no lockout".to_string()),
            _ => None,
        },
        improvement_suggestion: Some("Enable account lockout".to_string()),
        risk_score: None,
        source: "db.log".to_string(),
        origin_document_index: doc,
        sequence_index: seq,
        policy_refs: vec!["AC-7".to_string()],
    }
}

#[test]
fn table_has_fixed_columns_and_one_row_per_record() {
    let records = vec![
        record(0, 1, Verdict::NonCompliant),
        record(0, 0, Verdict::Compliant),
    ];
    let table = build_table(&records).expect("table");
    assert_eq!(table.headers, REPORT_COLUMNS.to_vec());
    assert_eq!(table.rows.len(), 2);
    assert!(table.rows.iter().all(|r| r.len() == 5));
    assert_eq!(
        table.rows[0],
        vec![
            "DB log: 2026-01-04 login failed (chunk 1)".to_string(),
            "Access Control".to_string(),
            "Non-Compliant".to_string(),
            "repeated failures, no lockout".to_string(),
            "Enable account lockout".to_string(),
        ]
    );
}

#[test]
fn unknown_evidence_type_shows_snippet_only() {
    let mut r = record(0, 0, Verdict::Unknown);
    r.evidence_type = "Unknown".to_string();
    let table = build_table(&[r]).expect("table");
    assert_eq!(table.rows[0][0], "2026-01-04 login failed (chunk 0)");
}

#[test]
fn export_refuses_empty_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = export_report(&[], dir.path(), "2026-02-10T00:00:00Z").expect_err("empty");
    assert_eq!(err.code, codes::REPORT_EMPTY);
    assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 0);

    let err = build_table(&[]).expect_err("empty");
    assert_eq!(err.code, codes::REPORT_EMPTY);
}

#[test]
fn exported_workbook_has_one_sheet_with_the_audit_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let records = vec![
        record(0, 0, Verdict::NonCompliant),
        record(1, 0, Verdict::Partial),
    ];
    let artifact =
        export_report(&records, dir.path(), "2026-02-10T00:00:00Z").expect("export");
    assert!(artifact.path.ends_with("audit_assessment_2026_02_10T00_00_00Z.xlsx"));
    assert_eq!(artifact.format, ReportFormat::Xlsx);
    assert_eq!(artifact.rows, 2);

    let bytes = artifact.read_back().expect("read back");
    assert_eq!(bytes.len() as u64, artifact.bytes);

    let mut workbook = Xlsx::new(Cursor::new(bytes)).expect("open workbook");
    assert_eq!(workbook.sheet_names(), vec![WORKBOOK_SHEET.to_string()]);
    let range = workbook.worksheet_range(WORKBOOK_SHEET).expect("sheet");
    assert_eq!(range.get_size(), (3, 5));

    let rows = range
        .rows()
        .map(|row| row.iter().map(|c| c.to_string()).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    assert_eq!(rows[0], REPORT_COLUMNS.to_vec());
    assert_eq!(
        rows[1],
        vec![
            "DB log: 2026-01-04 login failed (chunk 0)",
            "Access Control",
            "Non-Compliant",
            "repeated failures, no lockout",
            "Enable account lockout",
        ]
    );
    assert_eq!(rows[2][2], "Partial");
}

#[test]
fn csv_export_reads_back_byte_for_byte() {
    let dir = tempfile::tempdir().expect("tempdir");
    let records = vec![
        record(0, 0, Verdict::NonCompliant),
        record(1, 0, Verdict::Partial),
    ];
    let artifact = export_report_as(
        &records,
        dir.path(),
        "2026-02-10T00:00:00Z",
        ReportFormat::Csv,
    )
    .expect("export");
    assert!(artifact.path.ends_with("audit_assessment_2026_02_10T00_00_00Z.csv"));
    assert_eq!(artifact.format, ReportFormat::Csv);
    assert_eq!(artifact.rows, 2);

    let bytes = artifact.read_back().expect("read back");
    assert_eq!(bytes.len() as u64, artifact.bytes);

    let mut rdr = csv::Reader::from_reader(bytes.as_slice());
    let headers = rdr.headers().expect("headers").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), REPORT_COLUMNS.to_vec());
    let rows = rdr.records().collect::<Result<Vec<_>, _>>().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[1][2], "Partial");
}

#[test]
fn read_back_detects_tampering() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("report.csv");
    let artifact =
        export_report_to(&[record(0, 0, Verdict::Compliant)], &path).expect("export");
    std::fs::write(&path, b"tampered").expect("overwrite");
    let err = artifact.read_back().expect_err("tampered");
    assert_eq!(err.code, codes::REPORT_WRITE_FAILED);
}

#[test]
fn summary_is_deterministic_across_completion_orders() {
    let a = vec![
        record(1, 0, Verdict::Unknown),
        record(0, 1, Verdict::NonCompliant),
        record(0, 0, Verdict::Compliant),
    ];
    let mut b = a.clone();
    b.reverse();

    let md_a = render_summary_markdown(&a).expect("summary");
    let md_b = render_summary_markdown(&b).expect("summary");
    assert_eq!(md_a, md_b);
    assert!(md_a.contains("| Non-Compliant | 1 |"));
    assert!(md_a.contains("### Access Control (db.log #1)"));
    assert!(md_a.contains("## Needs manual review"));
}
