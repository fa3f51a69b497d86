//! Retrieval-quality evaluation.
//!
//! This module provides:
//! - Cosine similarity scoring between queries and retrieved chunks
//! - Search and LLM answer quality analysis with an owned history
//! - The per-database evaluator and multi-database orchestrator
//! - Aggregation, table rendering and JSON/CSV export of results
//! - Query-time re-ranking of split documents

pub mod evaluator;
pub mod operations;
pub mod quality;
pub mod report;
pub mod rerank;
pub mod similarity;

pub use evaluator::{
    DatabaseEvaluationResult, DatabaseEvaluations, MAX_QUESTIONS_PER_DATABASE, QuestionFailure,
    QuestionMetrics, QuestionOutcome, QuestionResult, VectorDbEvaluation, score_candidates,
};
pub use operations::{MetricsCollector, OperationMetrics, OperationOutcome};
pub use quality::{
    DocumentScore, ExportFormat, LlmQualityMetrics, LlmSummary, QualityAnalyzer, QualityHistory,
    QueryAnalysis, SearchId, SearchQualityMetrics, SearchSummary,
};
pub use report::{
    AggregatedMetrics, EvaluationReport, SummaryRow, calculate_metrics_from_results, load_report,
};
pub use rerank::rerank_chunks;
pub use similarity::{cosine, cosine_similarity};
