//! On-disk layout of a saved knowledge base.
//!
//! ```text
//! <dir>/kb_manifest.json   format version, model, dims, entry count, entries checksum
//! <dir>/kb_entries.json    chunks and vectors, in insertion order
//! ```
//!
//! The entries file is written first and the manifest last, so a manifest only ever
//! describes a complete entries file.

use std::fs;
use std::path::{Path, PathBuf};

use ct_core::error::{codes, AppError};
use ct_core::normalize::text::sha256_hex;
use serde::{Deserialize, Serialize};

use super::KbEntry;

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "kb_manifest.json";
pub const ENTRIES_FILE: &str = "kb_entries.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KbManifest {
    pub format_version: u32,
    pub model: String,
    pub dims: usize,
    pub entry_count: usize,
    pub entries_sha256: String,
    pub built_at: String,
}

fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

fn entries_path(dir: &Path) -> PathBuf {
    dir.join(ENTRIES_FILE)
}

fn corrupt(message: &str, details: String) -> AppError {
    AppError::new(codes::KB_INDEX_CORRUPT, message).with_details(details)
}

fn write_atomic(path: &Path, bytes: &[u8], what: &str) -> Result<(), AppError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| {
        AppError::new(codes::KB_STORE_FAILED, format!("Failed to write {what}"))
            .with_details(format!("path={}; err={}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        AppError::new(codes::KB_STORE_FAILED, format!("Failed to finalize {what} write"))
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
    })
}

pub(crate) fn write(
    dir: &Path,
    model: &str,
    dims: usize,
    built_at: &str,
    entries: &[KbEntry],
) -> Result<KbManifest, AppError> {
    fs::create_dir_all(dir).map_err(|e| {
        AppError::new(codes::KB_STORE_FAILED, "Failed to create knowledge base directory")
            .with_details(format!("path={}; err={}", dir.display(), e))
    })?;

    let entries_json = serde_json::to_vec(entries).map_err(|e| {
        AppError::new(codes::KB_STORE_FAILED, "Failed to encode knowledge base entries")
            .with_details(e.to_string())
    })?;
    let manifest = KbManifest {
        format_version: FORMAT_VERSION,
        model: model.to_string(),
        dims,
        entry_count: entries.len(),
        entries_sha256: sha256_hex(&entries_json),
        built_at: built_at.to_string(),
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest).map_err(|e| {
        AppError::new(codes::KB_STORE_FAILED, "Failed to encode knowledge base manifest")
            .with_details(e.to_string())
    })?;

    write_atomic(&entries_path(dir), &entries_json, "knowledge base entries")?;
    write_atomic(&manifest_path(dir), &manifest_json, "knowledge base manifest")?;
    Ok(manifest)
}

pub(crate) fn read(dir: &Path) -> Result<(KbManifest, Vec<KbEntry>), AppError> {
    let mpath = manifest_path(dir);
    let mbytes = fs::read(&mpath).map_err(|e| {
        corrupt(
            "Knowledge base manifest is missing or unreadable",
            format!("path={}; err={}", mpath.display(), e),
        )
    })?;
    let manifest: KbManifest = serde_json::from_slice(&mbytes).map_err(|e| {
        corrupt(
            "Failed to decode knowledge base manifest",
            format!("path={}; err={}", mpath.display(), e),
        )
    })?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(
            "Unsupported knowledge base format version",
            format!(
                "found={}; supported={FORMAT_VERSION}",
                manifest.format_version
            ),
        ));
    }

    let epath = entries_path(dir);
    let ebytes = fs::read(&epath).map_err(|e| {
        corrupt(
            "Knowledge base entries are missing or unreadable",
            format!("path={}; err={}", epath.display(), e),
        )
    })?;
    let actual = sha256_hex(&ebytes);
    if actual != manifest.entries_sha256 {
        return Err(corrupt(
            "Knowledge base entries checksum mismatch",
            format!("expected={}; actual={actual}", manifest.entries_sha256),
        ));
    }
    let entries: Vec<KbEntry> = serde_json::from_slice(&ebytes).map_err(|e| {
        corrupt(
            "Failed to decode knowledge base entries",
            format!("path={}; err={}", epath.display(), e),
        )
    })?;

    if entries.len() != manifest.entry_count {
        return Err(corrupt(
            "Knowledge base entry count mismatch",
            format!("expected={}; got={}", manifest.entry_count, entries.len()),
        ));
    }
    if entries.is_empty() || manifest.dims == 0 {
        return Err(corrupt(
            "Knowledge base holds no entries",
            format!("path={}", dir.display()),
        ));
    }
    if let Some((i, e)) = entries
        .iter()
        .enumerate()
        .find(|(_, e)| e.vector.len() != manifest.dims)
    {
        return Err(corrupt(
            "Knowledge base vector dims mismatch",
            format!(
                "entry={i}; expected={}; got={}",
                manifest.dims,
                e.vector.len()
            ),
        ));
    }

    Ok((manifest, entries))
}

/// Returns whether anything was removed.
pub(crate) fn remove(dir: &Path) -> Result<bool, AppError> {
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(dir).map_err(|e| {
        AppError::new(codes::KB_STORE_FAILED, "Failed to delete saved knowledge base")
            .with_details(format!("path={}; err={}", dir.display(), e))
    })?;
    Ok(true)
}
