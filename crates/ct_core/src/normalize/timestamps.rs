use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
        AppError::new("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string())
    })
}

/// `2026-02-10T00:00:00Z` -> `2026_02_10T00_00_00Z`, safe for every filesystem.
pub fn filename_safe_timestamp(ts: &str) -> String {
    ts.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect()
}
