//! Embedding backends.
//!
//! The evaluation core only sees the [`Embedder`] trait. Two implementations
//! ship with the crate: [`HttpEmbedder`] for OpenAI-compatible
//! `/v1/embeddings` endpoints (Ollama, vLLM, OpenAI) and, with the
//! `local-embeddings` feature, an in-process sentence-transformers model.

mod http;
#[cfg(feature = "local-embeddings")]
mod local;

pub use http::HttpEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddingModel;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::Result;
use std::sync::Arc;

/// Turns text into fixed-length vectors.
pub trait Embedder {
    /// Embed a search query.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of documents, one vector per input in order.
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Construct the embedder selected by the configuration.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Http => Ok(Arc::new(HttpEmbedder::new(config.clone()))),
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => Ok(Arc::new(LocalEmbeddingModel::load(&config.model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => Err(crate::error::RagError::InvalidConfig(
            "the local embedding backend requires building with --features local-embeddings"
                .to_string(),
        )),
    }
}
