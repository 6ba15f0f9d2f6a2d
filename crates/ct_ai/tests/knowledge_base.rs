use std::fs;

use ct_ai::embeddings::{Embedder, HashingEmbedder};
use ct_ai::knowledge::store::{ENTRIES_FILE, MANIFEST_FILE};
use ct_ai::knowledge::KnowledgeBase;
use ct_core::domain::Chunk;
use ct_core::error::{codes, AppError};
use pretty_assertions::assert_eq;

struct CountABEmbedder;

impl Embedder for CountABEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let mut a = 0u32;
        let mut b = 0u32;
        for ch in input.chars() {
            if ch == 'a' {
                a += 1;
            } else if ch == 'b' {
                b += 1;
            }
        }
        Ok(vec![a as f32, b as f32])
    }
}

struct ShrinkingEmbedder;

impl Embedder for ShrinkingEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        Ok(vec![1.0; input.len().min(3)])
    }
}

fn chunk(seq: u32, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        source: "policies.txt".to_string(),
        origin_document_index: 0,
        sequence_index: seq,
        start_offset: 0,
    }
}

fn ab_kb() -> KnowledgeBase {
    let chunks = vec![
        chunk(0, "ab"),
        chunk(1, "aaa"),
        chunk(2, "ba"),
        chunk(3, "   "),
        chunk(4, "b a"),
        chunk(5, "zzz"),
    ];
    KnowledgeBase::build(&chunks, &CountABEmbedder, "count-ab").expect("build")
}

fn texts(hits: &[ct_ai::knowledge::KbHit]) -> Vec<String> {
    hits.iter().map(|h| h.chunk.text.clone()).collect()
}

#[test]
fn build_skips_blank_chunks_and_records_metadata() {
    let kb = ab_kb();
    assert_eq!(kb.len(), 5);
    assert_eq!(kb.model(), "count-ab");
    assert_eq!(kb.dims(), 2);
    assert!(!kb.built_at().is_empty());
}

#[test]
fn build_rejects_input_with_no_usable_chunk() {
    let err = KnowledgeBase::build(&[chunk(0, " \n ")], &CountABEmbedder, "m").expect_err("empty");
    assert_eq!(err.code, codes::KB_EMPTY_INPUT);
    let err = KnowledgeBase::build(&[], &CountABEmbedder, "m").expect_err("empty");
    assert_eq!(err.code, codes::KB_EMPTY_INPUT);
}

#[test]
fn build_rejects_inconsistent_dims() {
    let err = KnowledgeBase::build(&[chunk(0, "abcd"), chunk(1, "ab")], &ShrinkingEmbedder, "m")
        .expect_err("dims");
    assert_eq!(err.code, codes::AI_EMBEDDINGS_FAILED);
}

#[test]
fn query_ranks_descending_and_ties_keep_insertion_order() {
    let kb = ab_kb();
    let hits = kb.query(&CountABEmbedder, "ab", 3).expect("query");
    assert_eq!(texts(&hits), vec!["ab", "ba", "b a"]);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let hits = kb.query(&CountABEmbedder, "aaaa", 2).expect("query");
    assert_eq!(texts(&hits), vec!["aaa", "ab"]);
}

#[test]
fn query_clamps_k_to_index_size_and_to_at_least_one() {
    let kb = ab_kb();
    let all = kb.query(&CountABEmbedder, "ab", 50).expect("query");
    assert_eq!(all.len(), kb.len());
    assert_eq!(all.last().map(|h| h.chunk.text.as_str()), Some("zzz"));
    assert_eq!(all.last().map(|h| h.score), Some(0.0));

    let one = kb.query(&CountABEmbedder, "ab", 0).expect("query");
    assert_eq!(one.len(), 1);
}

#[test]
fn query_rejects_blank_text() {
    let kb = ab_kb();
    let err = kb.query(&CountABEmbedder, "  ", 3).expect_err("blank");
    assert_eq!(err.code, codes::AI_RETRIEVAL_FAILED);
}

#[test]
fn save_then_load_answers_queries_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kb_dir = dir.path().join("saved_kb_vectorstore");
    let embedder = HashingEmbedder::default();
    let chunks = vec![
        chunk(0, "AC-7: Lock accounts after five failed logins."),
        chunk(1, "IA-5: Rotate passwords every 90 days."),
        chunk(2, "AU-2: Log all authentication events."),
    ];
    let kb = KnowledgeBase::build(&chunks, &embedder, "hashing").expect("build");
    let manifest = kb.save(&kb_dir).expect("save");
    assert_eq!(manifest.entry_count, 3);

    let loaded = KnowledgeBase::load(&kb_dir).expect("load");
    assert_eq!(loaded, kb);
    for q in ["failed logins", "password rotation", "audit events"] {
        assert_eq!(
            loaded.query(&embedder, q, 3).expect("query"),
            kb.query(&embedder, q, 3).expect("query")
        );
    }
}

#[test]
fn load_rejects_tampered_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    ab_kb().save(dir.path()).expect("save");

    let entries = dir.path().join(ENTRIES_FILE);
    let mut bytes = fs::read(&entries).expect("read");
    bytes.extend_from_slice(b" ");
    fs::write(&entries, bytes).expect("write");

    let err = KnowledgeBase::load(dir.path()).expect_err("corrupt");
    assert_eq!(err.code, codes::KB_INDEX_CORRUPT);
}

#[test]
fn load_rejects_unknown_format_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    ab_kb().save(dir.path()).expect("save");

    let manifest = dir.path().join(MANIFEST_FILE);
    let mut v: serde_json::Value =
        serde_json::from_slice(&fs::read(&manifest).expect("read")).expect("json");
    v["format_version"] = serde_json::json!(99);
    fs::write(&manifest, serde_json::to_vec(&v).expect("encode")).expect("write");

    let err = KnowledgeBase::load(dir.path()).expect_err("version");
    assert_eq!(err.code, codes::KB_INDEX_CORRUPT);
}

#[test]
fn load_rejects_missing_manifest_or_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    ab_kb().save(dir.path()).expect("save");
    fs::remove_file(dir.path().join(MANIFEST_FILE)).expect("remove");

    let err = KnowledgeBase::load(dir.path()).expect_err("missing manifest");
    assert_eq!(err.code, codes::KB_INDEX_CORRUPT);

    let err = KnowledgeBase::load(&dir.path().join("nope")).expect_err("missing dir");
    assert_eq!(err.code, codes::KB_INDEX_CORRUPT);
}

#[test]
fn delete_removes_saved_kb_and_tolerates_missing_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kb_dir = dir.path().join("kb");
    ab_kb().save(&kb_dir).expect("save");

    assert!(KnowledgeBase::delete(&kb_dir).expect("delete"));
    assert!(!kb_dir.exists());
    assert!(!KnowledgeBase::delete(&kb_dir).expect("delete again"));
}

struct PoisonedEmbedder;

impl Embedder for PoisonedEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        if input.contains("poison") {
            Ok(vec![f32::NAN, 1.0])
        } else if input.contains("left") {
            Ok(vec![1.0, 0.0])
        } else {
            Ok(vec![0.6, 0.8])
        }
    }
}

#[test]
fn nan_scores_rank_last_without_breaking_the_sort() {
    let chunks = vec![
        chunk(0, "poison one"),
        chunk(1, "left"),
        chunk(2, "poison two"),
        chunk(3, "other"),
        chunk(4, "left again"),
    ];
    let kb = KnowledgeBase::build(&chunks, &PoisonedEmbedder, "poisoned").expect("build");

    let hits = kb.query(&PoisonedEmbedder, "left side", 5).expect("query");
    assert_eq!(
        texts(&hits),
        vec!["left", "left again", "other", "poison one", "poison two"]
    );
    assert!(hits[3].score.is_infinite() && hits[3].score < 0.0);
}
