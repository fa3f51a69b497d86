//! Query-time re-ranking of documents that did not come from an index.
//!
//! Documents are split, every chunk is embedded alongside the query, and the
//! best `max_results` chunks are returned with their `score` recorded in the
//! chunk metadata.

use crate::document::SourceDocument;
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::eval::similarity::cosine;
use crate::splitter::SplitterKind;
use crate::store::Candidate;
use serde_json::Value;
use tracing::debug;

/// Metadata key holding a re-ranked chunk's similarity to the query.
pub const SCORE_KEY: &str = "score";

/// Split `documents`, score every chunk against `query` and keep the top
/// `max_results`, highest score first.
pub fn rerank_chunks(
    query: &str,
    documents: &[SourceDocument],
    splitter: &SplitterKind,
    embedder: &dyn Embedder,
    max_results: usize,
) -> Result<Vec<Candidate>> {
    splitter.validate()?;

    let chunks: Vec<_> = documents
        .iter()
        .flat_map(|document| splitter.split_document(document))
        .collect();
    if chunks.is_empty() || max_results == 0 {
        return Ok(Vec::new());
    }

    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let embeddings = embedder.embed_documents(&texts)?;
    if embeddings.len() != chunks.len() {
        return Err(RagError::Embedding(format!(
            "expected {} chunk embeddings, got {}",
            chunks.len(),
            embeddings.len()
        )));
    }

    let query_embedding = embedder.embed_query(query)?;
    let scores = cosine(&[query_embedding], &embeddings)?;

    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(max_results);

    debug!(query, chunks = chunks.len(), kept = ranked.len(), "re-ranked chunks");

    let mut chunks: Vec<Option<_>> = chunks.into_iter().map(Some).collect();
    Ok(ranked
        .into_iter()
        .filter_map(|(i, score)| {
            let chunk = chunks[i].take()?;
            let mut candidate = Candidate::new(chunk.text);
            candidate.metadata = chunk.metadata;
            candidate
                .metadata
                .insert(SCORE_KEY.to_string(), Value::from(score));
            Some(candidate)
        })
        .collect())
}
