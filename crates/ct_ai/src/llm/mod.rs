use ct_core::error::AppError;

/// Prompt in, completion out. No streaming. Shared across workers, so it must be
/// reentrant and hold no per-call state.
pub trait Llm: Send + Sync {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError>;
}

pub mod ollama_llm;

pub use ollama_llm::OllamaLlm;
