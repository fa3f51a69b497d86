//! RAG evaluation harness - retrieval-quality evaluation for vector databases.
//!
//! The harness compares vector databases by how similar the chunks they
//! retrieve are to the question that retrieved them. It also covers the
//! pieces needed to get there: splitting and indexing datasets, generating
//! evaluation questions with an LLM, and answering questions with a simple
//! RAG loop.
//!
//! # Quick Start
//!
//! ```no_run
//! use rag_eval_harness::{
//!     config::Config,
//!     document::load_questions,
//!     embeddings,
//!     eval::{EvaluationReport, VectorDbEvaluation},
//!     store::discover_databases,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate_embedding()?;
//!
//!     let embedder = embeddings::from_config(&config.embedding)?;
//!     let databases = discover_databases(&config.paths.databases_dir, Arc::clone(&embedder))?;
//!     let questions = load_questions(Path::new("datasets/questions.json"))?;
//!
//!     let mut evaluation = VectorDbEvaluation::new(embedder.as_ref(), 5);
//!     let results: Vec<_> = evaluation.execute(&databases, &questions)?.collect();
//!
//!     let report = EvaluationReport::new(results);
//!     println!("{}", report.render_table());
//!     report.save_json(Path::new("results/evaluation.json"))?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **VectorStore**: black-box "query in, candidate chunks out" seam
//! - **Embedder**: shared embedding model used to score every database alike
//! - **VectorDbEvaluation**: per-database evaluator and lazy orchestrator
//! - **QualityAnalyzer**: per-query statistics and quality history
//! - **EvaluationReport**: aggregation, table and JSON/CSV export
//! - **IndexPlan**: which database to build from which document rendition

pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod eval;
pub mod indexing;
pub mod llm;
pub mod persistence;
pub mod questions;
pub mod rag;
pub mod splitter;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use document::{Question, SourceDocument};
pub use embeddings::Embedder;
pub use error::{RagError, Result};
pub use eval::{EvaluationReport, QualityAnalyzer, VectorDbEvaluation, rerank_chunks};
pub use indexing::{IndexPlan, auto_plans, build_index};
pub use llm::{LanguageModel, LlmClient};
pub use questions::QuestionGenerator;
pub use rag::SimpleRag;
pub use store::{Candidate, LocalVectorStore, VectorDatabase, VectorStore};
