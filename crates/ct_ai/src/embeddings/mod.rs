use ct_core::error::AppError;

/// Text to fixed-length vector. Implementations must be reentrant: the knowledge base
/// calls them from several assessment workers at once.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;
}

pub mod hashing;
pub mod ollama_embed;

pub use hashing::HashingEmbedder;
pub use ollama_embed::OllamaEmbedder;
