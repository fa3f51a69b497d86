//! Error types for the RAG harness.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the RAG harness.
#[derive(Error, Debug)]
pub enum RagError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing evaluation output. The computation itself succeeded.
    #[error("Failed to export results to '{path}': {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: Box<RagError>,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An input file does not exist.
    #[error("File not found: '{0}'")]
    FileNotFound(PathBuf),

    /// No vector databases were supplied or discovered.
    #[error("No vector databases found for evaluation")]
    NoDatabases,

    /// The question set is empty.
    #[error("No questions found for evaluation")]
    NoQuestions,

    /// The dataset contains no documents.
    #[error("No documents found in '{0}'")]
    NoDocuments(PathBuf),

    /// A vector index was searched before it was loaded.
    #[error("Vector index '{0}' is not loaded")]
    IndexNotLoaded(String),

    /// The index artifact already exists and would be overwritten.
    #[error("Index file '{0}' already exists")]
    IndexExists(PathBuf),

    /// The index artifact does not exist.
    #[error("Index file not found at '{0}'")]
    IndexNotFound(PathBuf),

    /// Two embeddings with different dimensions were compared.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding backend error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A dataset record has no text in any rendition.
    #[error("Document {0} has no text, text_html or text_markdown field")]
    MissingText(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM response parsing error.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// The LLM returned nothing.
    #[error("LLM returned empty response")]
    EmptyResponse,

    /// The LLM reply parsed but contained no questions.
    #[error("LLM returned empty questions")]
    EmptyQuestions,

    /// Some documents failed during question generation.
    #[error("Failed to process {failed} documents. Successfully processed {succeeded} documents.")]
    QuestionGeneration { failed: usize, succeeded: usize },

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an error raised while persisting results.
    pub fn export(path: impl Into<PathBuf>, source: RagError) -> Self {
        Self::Export {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Serialization(err.to_string())
    }
}
