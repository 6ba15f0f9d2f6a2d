pub mod assess;
pub mod chat;
pub mod embeddings;
pub mod knowledge;
pub mod llm;
pub mod ollama;
pub mod pipeline;
pub mod prompts;
pub mod session;
