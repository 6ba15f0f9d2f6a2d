use std::fs;
use std::path::Path;

use calamine::Reader;

use crate::domain::Document;
use crate::error::{codes, AppError};
use crate::normalize::text::normalize_text;

use super::TextExtractor;

/// Maximum file size accepted for extraction (50MB).
const MAX_DOC_SIZE: u64 = 50 * 1024 * 1024;

/// PDF pages beyond this are dropped.
const MAX_PDF_PAGES: usize = 20;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "log", "md", "conf", "cfg", "yaml", "yml", "ini", "xml",
];
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "xlsm", "ods"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Image-to-text capability. Recognition quality is the engine's concern.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, path: &Path) -> Result<String, AppError>;
}

/// Extension-dispatched extractor for the upload types the audit accepts.
#[derive(Default)]
pub struct FileExtractor {
    ocr: Option<Box<dyn OcrEngine>>,
}

impl FileExtractor {
    pub fn new() -> Self {
        Self { ocr: None }
    }

    pub fn with_ocr(mut self, engine: Box<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }
}

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path) -> Result<Document, AppError> {
        check_file_size(path)?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let raw = if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            extract_plain_text(path)?
        } else if ext == "json" {
            extract_json(path)?
        } else if ext == "csv" {
            extract_csv(path)?
        } else if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
            extract_spreadsheet(path)?
        } else if ext == "pdf" {
            extract_pdf(path)?
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            match self.ocr.as_ref() {
                Some(engine) => engine.recognize(path)?,
                None => {
                    return Err(AppError::new(
                        codes::EXTRACTION_UNSUPPORTED,
                        "No OCR engine configured for image evidence",
                    )
                    .with_details(format!("path={}", path.display())))
                }
            }
        } else {
            return Err(AppError::new(
                codes::EXTRACTION_UNSUPPORTED,
                "Unsupported file type",
            )
            .with_details(format!("path={}; ext={ext}", path.display())));
        };

        Ok(Document::new(source_name(path), normalize_text(&raw)))
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn extraction_error(message: &str, path: &Path, err: impl std::fmt::Display) -> AppError {
    AppError::new(codes::EXTRACTION_FAILED, message)
        .with_details(format!("path={}; err={}", path.display(), err))
}

fn check_file_size(path: &Path) -> Result<u64, AppError> {
    let size = fs::metadata(path)
        .map_err(|e| extraction_error("Failed to read file metadata", path, e))?
        .len();
    if size > MAX_DOC_SIZE {
        return Err(AppError::new(codes::EXTRACTION_FAILED, "File too large").with_details(
            format!(
                "path={}; size={size}; max={MAX_DOC_SIZE}",
                path.display()
            ),
        ));
    }
    Ok(size)
}

fn extract_plain_text(path: &Path) -> Result<String, AppError> {
    let bytes = fs::read(path).map_err(|e| extraction_error("Failed to read file", path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Pretty-print JSON so the chunker can cut between keys. Invalid JSON (JSON Lines
/// exports, truncated dumps) is kept as plain text.
fn extract_json(path: &Path) -> Result<String, AppError> {
    let raw = extract_plain_text(path)?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(v) => serde_json::to_string_pretty(&v)
            .map_err(|e| extraction_error("Failed to re-encode JSON", path, e)),
        Err(e) => {
            tracing::debug!(path = %path.display(), err = %e, "not a single JSON document; keeping raw text");
            Ok(raw)
        }
    }
}

/// Re-emit the CSV through the csv writer so quoting and row shape are normalized.
fn extract_csv(path: &Path) -> Result<String, AppError> {
    let bytes = fs::read(path).map_err(|e| extraction_error("Failed to read file", path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for rec in rdr.byte_records() {
        let rec = rec.map_err(|e| extraction_error("Failed to parse CSV", path, e))?;
        let fields = rec
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect::<Vec<_>>();
        wtr.write_record(&fields)
            .map_err(|e| extraction_error("Failed to normalize CSV", path, e))?;
    }
    let out = wtr
        .into_inner()
        .map_err(|e| extraction_error("Failed to normalize CSV", path, e))?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn extract_spreadsheet(path: &Path) -> Result<String, AppError> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| extraction_error("Failed to open spreadsheet", path, e))?;

    let mut out = String::new();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), sheet = %name, err = %e, "unreadable sheet skipped");
                continue;
            }
        };
        out.push_str(&format!("## Sheet: {name}\n"));
        for row in range.rows() {
            let cells = row.iter().map(|c| c.to_string()).collect::<Vec<_>>();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out.push('\n');
    }
    Ok(out)
}

fn extract_pdf(path: &Path) -> Result<String, AppError> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| extraction_error("Failed to extract PDF text", path, e))?;

    // pdf-extract separates pages with form feeds.
    let pages = text.split('\x0c').collect::<Vec<_>>();
    if pages.len() > MAX_PDF_PAGES {
        tracing::warn!(
            path = %path.display(),
            pages = pages.len(),
            kept = MAX_PDF_PAGES,
            "PDF truncated to page limit"
        );
    }
    let mut out = String::new();
    for page in pages.iter().take(MAX_PDF_PAGES) {
        let trimmed = page.trim();
        if !trimmed.is_empty() {
            out.push_str(trimmed);
            out.push('\n');
        }
    }
    Ok(out)
}
