//! Vector stores: the retrieval seam used by evaluation and RAG.
//!
//! [`VectorStore`] is the black-box capability "given a query, return up to k
//! candidate chunks". [`LocalVectorStore`] implements it over a brute-force
//! cosine [`FlatIndex`] persisted inside a database directory.

use crate::document::Metadata;
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::eval::similarity::cosine_similarity;
use crate::persistence::{self, DEFAULT_INDEX_FILENAME};
use crate::splitter::Chunk;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Candidate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Anything that can answer nearest-neighbour queries over text chunks.
pub trait VectorStore {
    /// Return up to `max_results` candidates for `query`, best first.
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<Candidate>>;

    /// Check that the store can serve queries.
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }
}

/// A named vector store, as discovered on disk.
pub struct VectorDatabase {
    pub name: String,
    pub store: Box<dyn VectorStore>,
}

impl VectorDatabase {
    pub fn new(name: impl Into<String>, store: Box<dyn VectorStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl std::fmt::Debug for VectorDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorDatabase")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A vector index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// Brute-force cosine similarity index.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, rejecting mixed embedding dimensions.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Result<Self> {
        let mut index = Self::new();
        for entry in entries {
            index.push(entry)?;
        }
        Ok(index)
    }

    /// Embed chunks in batches and build the index.
    pub fn build(chunks: &[Chunk], embedder: &dyn Embedder) -> Result<Self> {
        let batch_size = 32;
        let mut index = Self::new();

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let embeddings = embedder.embed_documents(&texts)?;

            if embeddings.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "expected {} embeddings, backend returned {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            for (chunk, embedding) in batch.iter().zip(embeddings) {
                index.push(IndexEntry {
                    content: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    embedding,
                })?;
            }
            debug!(indexed = index.len(), total = chunks.len(), "embedded batch");
        }

        Ok(index)
    }

    fn push(&mut self, entry: IndexEntry) -> Result<()> {
        if let Some(expected) = self.dimension() {
            if entry.embedding.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: entry.embedding.len(),
                });
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Embedding dimension, or `None` for an empty index.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    /// Number of chunks in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all entries.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Top `top_k` entries by cosine similarity to `query_embedding`.
    pub fn nearest(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<(&IndexEntry, f32)>> {
        if let Some(expected) = self.dimension() {
            if query_embedding.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: query_embedding.len(),
                });
            }
        }

        let mut results: Vec<(&IndexEntry, f32)> = self
            .entries
            .iter()
            .map(|entry| (entry, cosine_similarity(query_embedding, &entry.embedding)))
            .collect();

        // Sort by score descending
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }
}

/// A vector database directory backed by a [`FlatIndex`].
pub struct LocalVectorStore {
    name: String,
    dir: PathBuf,
    index: Option<FlatIndex>,
    load_error: Option<String>,
    embedder: Arc<dyn Embedder>,
}

impl LocalVectorStore {
    /// Open a database directory, loading its index artifact if present.
    ///
    /// A missing or unreadable artifact leaves the store unloaded; searching it
    /// then fails with [`RagError::IndexNotLoaded`].
    pub fn open(dir: &Path, embedder: Arc<dyn Embedder>) -> Self {
        let name = dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed")
            .to_string();

        let (index, load_error) = match persistence::find_index_artifact(dir) {
            Some(path) => match persistence::load_index(&path) {
                Ok(index) => (Some(index), None),
                Err(e) => {
                    warn!(database = %name, path = %path.display(), error = %e, "failed to load index");
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };

        Self {
            name,
            dir: dir.to_path_buf(),
            index,
            load_error,
            embedder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.index.is_some()
    }

    /// Path of the artifact written by [`create`](Self::create).
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(DEFAULT_INDEX_FILENAME)
    }

    /// Embed `chunks`, save the index and keep it loaded.
    pub fn create(&mut self, chunks: &[Chunk]) -> Result<&FlatIndex> {
        if let Some(existing) = persistence::find_index_artifact(&self.dir) {
            return Err(RagError::IndexExists(existing));
        }

        let index = FlatIndex::build(chunks, self.embedder.as_ref())?;
        let path = self.index_path();
        persistence::save_index(&index, &path)?;
        info!(database = %self.name, chunks = index.len(), path = %path.display(), "index created");

        self.load_error = None;
        Ok(self.index.insert(index))
    }

    /// Remove the index artifact and unload the store.
    pub fn delete(&mut self) -> Result<()> {
        let path = persistence::find_index_artifact(&self.dir)
            .ok_or_else(|| RagError::IndexNotFound(self.index_path()))?;
        fs::remove_file(&path).map_err(|e| RagError::io(&path, e))?;
        self.index = None;
        Ok(())
    }

    fn loaded(&self) -> Result<&FlatIndex> {
        self.index.as_ref().ok_or_else(|| {
            let detail = match &self.load_error {
                Some(e) => format!("{} ({})", self.name, e),
                None => self.name.clone(),
            };
            RagError::IndexNotLoaded(detail)
        })
    }
}

impl VectorStore for LocalVectorStore {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<Candidate>> {
        let index = self.loaded()?;
        let query_embedding = self.embedder.embed_query(query)?;

        Ok(index
            .nearest(&query_embedding, max_results)?
            .into_iter()
            .map(|(entry, _)| Candidate {
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    fn ensure_ready(&self) -> Result<()> {
        self.loaded().map(|_| ())
    }
}

/// Discover vector databases: every subdirectory of `database_dir` holding an
/// index artifact, named after the subdirectory and sorted by name.
pub fn discover_databases(
    database_dir: &Path,
    embedder: Arc<dyn Embedder>,
) -> Result<Vec<VectorDatabase>> {
    if !database_dir.is_dir() {
        return Err(RagError::FileNotFound(database_dir.to_path_buf()));
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(database_dir).map_err(|e| RagError::io(database_dir, e))? {
        let path = entry.map_err(|e| RagError::io(database_dir, e))?.path();
        if path.is_dir() && persistence::find_index_artifact(&path).is_some() {
            dirs.push(path);
        }
    }
    dirs.sort();

    Ok(dirs
        .into_iter()
        .map(|dir| {
            let store = LocalVectorStore::open(&dir, Arc::clone(&embedder));
            VectorDatabase::new(store.name().to_string(), Box::new(store))
        })
        .collect())
}
