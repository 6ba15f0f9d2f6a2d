//! Offline embedder: feature hashing of lowercase word tokens.
//!
//! Each token is hashed into one of `dims` buckets with a signed weight, then the
//! vector is L2-normalized. Texts sharing vocabulary land close under cosine
//! similarity, which is enough for air-gapped runs and deterministic tests.

use ct_core::error::{codes, AppError};
use sha2::{Digest, Sha256};

use super::Embedder;

pub const DEFAULT_DIMS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: DEFAULT_DIMS }
    }
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self, AppError> {
        if dims == 0 {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "Hashing embedder dimension must be greater than zero",
            ));
        }
        Ok(Self { dims })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

fn tokens(input: &str) -> impl Iterator<Item = String> + '_ {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

impl Embedder for HashingEmbedder {
    /// `model` is ignored; the vector depends only on the text and `dims`.
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let mut v = vec![0.0f32; self.dims];
        for tok in tokens(input) {
            let digest = Sha256::digest(tok.as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(raw);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}
