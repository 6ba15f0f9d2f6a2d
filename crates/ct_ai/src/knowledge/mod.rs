//! Policy knowledge base: embedded policy chunks plus brute-force cosine retrieval.
//!
//! Built once in bulk, read-only afterwards, so assessment workers share it through an
//! `Arc` without locking.

use std::path::Path;
use std::time::Instant;

use ct_core::domain::{Chunk, Policy};
use ct_core::error::{codes, AppError};
use ct_core::normalize::timestamps::now_rfc3339_utc;
use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;

mod similarity;
pub mod store;

pub use store::KbManifest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KbEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KbHit {
    pub chunk: Chunk,
    pub score: f32,
}

impl KbHit {
    pub fn policy(&self) -> Policy {
        Policy::from_chunk(&self.chunk)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    model: String,
    dims: usize,
    built_at: String,
    entries: Vec<KbEntry>,
    norms: Vec<f32>,
}

impl KnowledgeBase {
    /// Embed every non-blank chunk, in order. Fails with `KB_EMPTY_INPUT` when nothing
    /// survives filtering.
    pub fn build(
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        model: &str,
    ) -> Result<Self, AppError> {
        let started = Instant::now();
        let usable = chunks
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect::<Vec<_>>();
        if usable.is_empty() {
            return Err(AppError::new(
                codes::KB_EMPTY_INPUT,
                "No valid content found in policy documents",
            )
            .with_details(format!("chunks_in={}", chunks.len())));
        }

        tracing::info!(chunks = usable.len(), model, "embedding policy chunks");

        let mut dims: Option<usize> = None;
        let mut entries = Vec::with_capacity(usable.len());
        for chunk in usable {
            let vector = embedder.embed(model, &chunk.text).map_err(|e| {
                AppError::new(codes::AI_EMBEDDINGS_FAILED, "Failed to compute embeddings")
                    .with_details(format!("chunk={}; err={}", chunk.origin_label(), e.describe()))
                    .with_retryable(e.retryable)
            })?;
            if vector.is_empty() {
                return Err(AppError::new(
                    codes::AI_EMBEDDINGS_FAILED,
                    "Embedder returned an empty vector",
                )
                .with_details(format!("chunk={}", chunk.origin_label())));
            }
            match dims {
                None => dims = Some(vector.len()),
                Some(d) if d != vector.len() => {
                    return Err(AppError::new(
                        codes::AI_EMBEDDINGS_FAILED,
                        "Embedding dims changed during build",
                    )
                    .with_details(format!(
                        "chunk={}; expected={d}; got={}",
                        chunk.origin_label(),
                        vector.len()
                    )));
                }
                Some(_) => {}
            }
            entries.push(KbEntry {
                chunk: chunk.clone(),
                vector,
            });
        }

        let kb = Self::from_parts(
            model.to_string(),
            dims.unwrap_or_default(),
            now_rfc3339_utc()?,
            entries,
        );
        tracing::info!(
            vectors = kb.len(),
            dims = kb.dims,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "knowledge base built"
        );
        Ok(kb)
    }

    fn from_parts(model: String, dims: usize, built_at: String, entries: Vec<KbEntry>) -> Self {
        let norms = entries
            .iter()
            .map(|e| similarity::l2_norm(&e.vector))
            .collect();
        Self {
            model,
            dims,
            built_at,
            entries,
            norms,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn built_at(&self) -> &str {
        &self.built_at
    }

    pub fn entries(&self) -> &[KbEntry] {
        &self.entries
    }

    /// Up to `min(k, len)` chunks, best first. Equal scores keep insertion order.
    /// `k` of zero is treated as one.
    pub fn query(
        &self,
        embedder: &dyn Embedder,
        text: &str,
        k: usize,
    ) -> Result<Vec<KbHit>, AppError> {
        let q = text.trim();
        if q.is_empty() {
            return Err(AppError::new(
                codes::AI_RETRIEVAL_FAILED,
                "Query must not be empty",
            ));
        }
        let k = k.max(1).min(self.entries.len());

        let qv = embedder.embed(&self.model, q).map_err(|e| {
            AppError::new(codes::AI_RETRIEVAL_FAILED, "Failed to embed query")
                .with_details(e.describe())
                .with_retryable(e.retryable)
        })?;
        if qv.len() != self.dims {
            return Err(AppError::new(
                codes::AI_RETRIEVAL_FAILED,
                "Query embedding dims do not match index dims",
            )
            .with_details(format!("index_dims={}; query_dims={}", self.dims, qv.len())));
        }
        let qnorm = similarity::l2_norm(&qv);

        let mut scored = self
            .entries
            .iter()
            .zip(self.norms.iter())
            .enumerate()
            .map(|(i, (e, norm))| {
                let score = similarity::cosine_similarity(&qv, &e.vector, qnorm, *norm);
                // NaN (overflowed norms) ranks last.
                (i, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect::<Vec<_>>();

        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| KbHit {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Policies whose id is in `ids`, grouped in `ids` order; within one id, insertion order.
    pub fn policies_by_ids(&self, ids: &[String]) -> Vec<Policy> {
        let all = self
            .entries
            .iter()
            .map(|e| Policy::from_chunk(&e.chunk))
            .collect::<Vec<_>>();
        ids.iter()
            .flat_map(|id| all.iter().filter(move |p| &p.id == id).cloned())
            .collect()
    }

    /// Persist to `dir`, replacing any knowledge base already saved there.
    pub fn save(&self, dir: &Path) -> Result<KbManifest, AppError> {
        let manifest = store::write(dir, &self.model, self.dims, &self.built_at, &self.entries)?;
        tracing::info!(path = %dir.display(), entries = manifest.entry_count, "knowledge base saved");
        Ok(manifest)
    }

    /// Restore a saved knowledge base exactly, or fail with `KB_INDEX_CORRUPT`.
    pub fn load(dir: &Path) -> Result<Self, AppError> {
        let (manifest, entries) = store::read(dir)?;
        tracing::info!(
            path = %dir.display(),
            entries = entries.len(),
            model = %manifest.model,
            "knowledge base loaded"
        );
        Ok(Self::from_parts(
            manifest.model,
            manifest.dims,
            manifest.built_at,
            entries,
        ))
    }

    /// Remove a saved knowledge base. Returns `false` when there was nothing to delete.
    pub fn delete(dir: &Path) -> Result<bool, AppError> {
        let removed = store::remove(dir)?;
        if removed {
            tracing::info!(path = %dir.display(), "saved knowledge base deleted");
        }
        Ok(removed)
    }
}
