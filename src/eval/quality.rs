//! Search and generation quality analysis.
//!
//! [`QualityAnalyzer`] turns raw similarity scores into per-query statistics,
//! scores LLM answers against the retrieved context, and keeps an append-only
//! [`QualityHistory`] that can be summarized or exported.

use super::operations::{MetricsCollector, OperationOutcome};
use super::report::csv_record;
use crate::document::Metadata;
use crate::error::{RagError, Result};
use crate::persistence::ensure_parent_dir;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Searches averaging below this similarity count as low quality.
pub const LOW_QUALITY_THRESHOLD: f32 = 0.5;

const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "query",
    "retrieved_count",
    "avg_similarity_score",
    "max_similarity_score",
    "min_similarity_score",
    "similarity_std",
    "documents",
    "context_relevance",
    "response_consistency",
    "response_completeness",
    "response",
];

/// Identifies one analyzed search so generation metrics can refer back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchId(u64);

/// A retrieved document and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentScore {
    pub content: String,
    pub similarity: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Statistics for a single search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQualityMetrics {
    pub id: SearchId,
    pub query: String,
    pub retrieved_count: usize,
    pub avg_similarity_score: f32,
    pub max_similarity_score: f32,
    pub min_similarity_score: f32,
    pub similarity_std: f32,
    pub documents: Vec<DocumentScore>,
    pub timestamp: DateTime<Local>,
    pub metadata: Metadata,
}

/// Heuristic scores for one generated answer, each in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmQualityMetrics {
    pub query: String,
    pub response: String,
    /// Share of query terms found in the context chunks.
    pub context_relevance: f32,
    /// Share of response terms grounded in the context chunks.
    pub response_consistency: f32,
    /// Share of query terms addressed by the response.
    pub response_completeness: f32,
    pub search_id: Option<SearchId>,
    pub timestamp: DateTime<Local>,
    pub metadata: Metadata,
}

/// A search joined with the answer generated from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query: String,
    pub search_quality: SearchQualityMetrics,
    pub llm_quality: LlmQualityMetrics,
    pub timestamp: DateTime<Local>,
}

/// Append-only record of everything the analyzer has seen.
#[derive(Debug, Default)]
pub struct QualityHistory {
    searches: Vec<SearchQualityMetrics>,
    generations: Vec<LlmQualityMetrics>,
    analyses: Vec<QueryAnalysis>,
    next_id: u64,
}

impl QualityHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn searches(&self) -> &[SearchQualityMetrics] {
        &self.searches
    }

    pub fn analyses(&self) -> &[QueryAnalysis] {
        &self.analyses
    }

    pub fn search(&self, id: SearchId) -> Option<&SearchQualityMetrics> {
        self.searches.iter().find(|s| s.id == id)
    }

    fn next_search_id(&mut self) -> SearchId {
        let id = SearchId(self.next_id);
        self.next_id += 1;
        id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub total_searches: usize,
    pub avg_similarity_overall: f32,
    pub avg_results_count: f32,
    pub low_quality_searches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmSummary {
    pub total_generations: usize,
    pub avg_context_relevance: f32,
    pub avg_response_consistency: f32,
    pub avg_response_completeness: f32,
}

/// Output format for [`QualityAnalyzer::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(RagError::InvalidConfig(format!(
                "unsupported export format '{}'",
                other
            ))),
        }
    }

    /// Format implied by the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::parse(path.extension().and_then(|e| e.to_str()).unwrap_or(""))
    }
}

/// Nested view of a [`QueryAnalysis`] used for JSON export.
#[derive(Debug, Serialize)]
struct AnalysisJson<'a> {
    timestamp: String,
    query: &'a str,
    search_quality: SearchQualityJson<'a>,
    llm_quality: LlmQualityJson<'a>,
}

#[derive(Debug, Serialize)]
struct SearchQualityJson<'a> {
    retrieved_count: usize,
    avg_similarity_score: f32,
    max_similarity_score: f32,
    min_similarity_score: f32,
    similarity_std: f32,
    documents: &'a [DocumentScore],
}

#[derive(Debug, Serialize)]
struct LlmQualityJson<'a> {
    context_relevance: f32,
    response_consistency: f32,
    response_completeness: f32,
    response: &'a str,
}

impl<'a> From<&'a QueryAnalysis> for AnalysisJson<'a> {
    fn from(a: &'a QueryAnalysis) -> Self {
        let s = &a.search_quality;
        let l = &a.llm_quality;
        Self {
            timestamp: a.timestamp.to_rfc3339(),
            query: &a.query,
            search_quality: SearchQualityJson {
                retrieved_count: s.retrieved_count,
                avg_similarity_score: s.avg_similarity_score,
                max_similarity_score: s.max_similarity_score,
                min_similarity_score: s.min_similarity_score,
                similarity_std: s.similarity_std,
                documents: &s.documents,
            },
            llm_quality: LlmQualityJson {
                context_relevance: l.context_relevance,
                response_consistency: l.response_consistency,
                response_completeness: l.response_completeness,
                response: &l.response,
            },
        }
    }
}

/// Flat view of a [`QueryAnalysis`], one CSV row.
#[derive(Debug)]
struct AnalysisRecord<'a> {
    timestamp: String,
    query: &'a str,
    retrieved_count: usize,
    avg_similarity_score: f32,
    max_similarity_score: f32,
    min_similarity_score: f32,
    similarity_std: f32,
    documents: &'a [DocumentScore],
    context_relevance: f32,
    response_consistency: f32,
    response_completeness: f32,
    response: &'a str,
}

impl<'a> From<&'a QueryAnalysis> for AnalysisRecord<'a> {
    fn from(a: &'a QueryAnalysis) -> Self {
        let s = &a.search_quality;
        let l = &a.llm_quality;
        Self {
            timestamp: a.timestamp.to_rfc3339(),
            query: &a.query,
            retrieved_count: s.retrieved_count,
            avg_similarity_score: s.avg_similarity_score,
            max_similarity_score: s.max_similarity_score,
            min_similarity_score: s.min_similarity_score,
            similarity_std: s.similarity_std,
            documents: &s.documents,
            context_relevance: l.context_relevance,
            response_consistency: l.response_consistency,
            response_completeness: l.response_completeness,
            response: &l.response,
        }
    }
}

impl AnalysisRecord<'_> {
    fn csv_fields(&self) -> Result<Vec<String>> {
        Ok(vec![
            self.timestamp.clone(),
            self.query.to_string(),
            self.retrieved_count.to_string(),
            self.avg_similarity_score.to_string(),
            self.max_similarity_score.to_string(),
            self.min_similarity_score.to_string(),
            self.similarity_std.to_string(),
            serde_json::to_string(self.documents)?,
            self.context_relevance.to_string(),
            self.response_consistency.to_string(),
            self.response_completeness.to_string(),
            self.response.to_string(),
        ])
    }
}

/// Computes and records search and generation quality.
#[derive(Debug, Default)]
pub struct QualityAnalyzer {
    history: QualityHistory,
    operations: MetricsCollector,
}

impl QualityAnalyzer {
    pub fn new(history: QualityHistory) -> Self {
        Self {
            history,
            operations: MetricsCollector::new(),
        }
    }

    pub fn history(&self) -> &QualityHistory {
        &self.history
    }

    pub fn operations(&self) -> &MetricsCollector {
        &self.operations
    }

    pub fn start_operation(&mut self, name: &str) {
        self.operations.start_operation(name);
    }

    /// Finish a timed operation that did not reach an analysis step.
    pub fn end_operation(&mut self, name: &str, outcome: OperationOutcome, fields: Metadata) {
        self.operations.end_operation(name, outcome, fields);
    }

    /// Summarize the similarity scores of one search.
    ///
    /// Returns `None` when there are no scores. `context` is stored as the
    /// record's metadata.
    pub fn analyze_search_quality(
        &mut self,
        query: &str,
        similarity_scores: &[f32],
        documents: Vec<DocumentScore>,
        context: Metadata,
    ) -> Option<SearchQualityMetrics> {
        if similarity_scores.is_empty() {
            warn!(query, "no similarity scores to analyze");
            return None;
        }

        let n = similarity_scores.len() as f32;
        let avg = similarity_scores.iter().sum::<f32>() / n;
        let max = similarity_scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = similarity_scores.iter().copied().fold(f32::INFINITY, f32::min);
        let variance = similarity_scores.iter().map(|s| (s - avg).powi(2)).sum::<f32>() / n;

        let metrics = SearchQualityMetrics {
            id: self.history.next_search_id(),
            query: query.to_string(),
            retrieved_count: similarity_scores.len(),
            avg_similarity_score: avg,
            max_similarity_score: max,
            min_similarity_score: min,
            similarity_std: variance.sqrt(),
            documents,
            timestamp: Local::now(),
            metadata: context,
        };

        info!(
            query,
            avg_similarity = metrics.avg_similarity_score,
            max_similarity = metrics.max_similarity_score,
            retrieved = metrics.retrieved_count,
            "search quality analyzed"
        );

        let mut fields = Metadata::new();
        fields.insert("avg_similarity".to_string(), Value::from(avg));
        fields.insert("results_count".to_string(), Value::from(metrics.retrieved_count));
        self.operations
            .end_operation("vector_search", OperationOutcome::Success, fields);

        self.history.searches.push(metrics.clone());
        Some(metrics)
    }

    /// Score a generated answer against the chunks it was generated from.
    ///
    /// When `search_id` names a recorded search, the pair is also stored as a
    /// [`QueryAnalysis`].
    pub fn analyze_llm_quality(
        &mut self,
        query: &str,
        response: &str,
        context_chunks: &[&str],
        search_id: Option<SearchId>,
        context: Metadata,
    ) -> LlmQualityMetrics {
        let query_terms = terms(query);
        let response_terms = terms(response);
        let context_terms: HashSet<String> = context_chunks.iter().flat_map(|c| terms(c)).collect();

        let metrics = LlmQualityMetrics {
            query: query.to_string(),
            response: response.to_string(),
            context_relevance: coverage(&query_terms, &context_terms),
            response_consistency: coverage(&response_terms, &context_terms),
            response_completeness: coverage(&query_terms, &response_terms),
            search_id,
            timestamp: Local::now(),
            metadata: context,
        };

        info!(
            query,
            context_relevance = metrics.context_relevance,
            response_consistency = metrics.response_consistency,
            response_completeness = metrics.response_completeness,
            "llm quality analyzed"
        );

        let mut fields = Metadata::new();
        fields.insert("context_relevance".to_string(), Value::from(metrics.context_relevance));
        fields.insert(
            "response_consistency".to_string(),
            Value::from(metrics.response_consistency),
        );
        fields.insert(
            "response_completeness".to_string(),
            Value::from(metrics.response_completeness),
        );
        self.operations
            .end_operation("llm_generation", OperationOutcome::Success, fields);

        if let Some(search) = search_id.and_then(|id| self.history.search(id)).cloned() {
            self.history.analyses.push(QueryAnalysis {
                query: query.to_string(),
                search_quality: search,
                llm_quality: metrics.clone(),
                timestamp: Local::now(),
            });
        }

        self.history.generations.push(metrics.clone());
        metrics
    }

    pub fn search_summary(&self) -> Option<SearchSummary> {
        let searches = &self.history.searches;
        if searches.is_empty() {
            return None;
        }
        let n = searches.len() as f32;
        Some(SearchSummary {
            total_searches: searches.len(),
            avg_similarity_overall: searches.iter().map(|s| s.avg_similarity_score).sum::<f32>() / n,
            avg_results_count: searches.iter().map(|s| s.retrieved_count as f32).sum::<f32>() / n,
            low_quality_searches: searches
                .iter()
                .filter(|s| s.avg_similarity_score < LOW_QUALITY_THRESHOLD)
                .count(),
        })
    }

    pub fn llm_summary(&self) -> Option<LlmSummary> {
        let generations = &self.history.generations;
        if generations.is_empty() {
            return None;
        }
        let n = generations.len() as f32;
        Some(LlmSummary {
            total_generations: generations.len(),
            avg_context_relevance: generations.iter().map(|g| g.context_relevance).sum::<f32>() / n,
            avg_response_consistency: generations.iter().map(|g| g.response_consistency).sum::<f32>() / n,
            avg_response_completeness: generations.iter().map(|g| g.response_completeness).sum::<f32>() / n,
        })
    }

    /// Write every recorded [`QueryAnalysis`] to `path`.
    pub fn export(&self, path: &Path, format: ExportFormat) -> Result<()> {
        self.write_analyses(path, format)
            .map_err(|e| RagError::export(path, e))?;
        info!(path = %path.display(), entries = self.history.analyses.len(), "exported quality analyses");
        Ok(())
    }

    fn write_analyses(&self, path: &Path, format: ExportFormat) -> Result<()> {
        ensure_parent_dir(path)?;
        let analyses = &self.history.analyses;

        let content = match format {
            ExportFormat::Json => {
                let records: Vec<AnalysisJson> = analyses.iter().map(AnalysisJson::from).collect();
                serde_json::to_string_pretty(&records)?
            }
            ExportFormat::Csv => {
                let header: Vec<String> = CSV_HEADER.iter().map(|h| h.to_string()).collect();
                let mut out = csv_record(&header);
                for record in analyses.iter().map(AnalysisRecord::from) {
                    out.push_str(&csv_record(&record.csv_fields()?));
                }
                out
            }
        };

        fs::write(path, content).map_err(|e| RagError::io(path, e))
    }
}

/// Lowercased alphanumeric words of three or more characters.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn coverage(needles: &HashSet<String>, haystack: &HashSet<String>) -> f32 {
    if needles.is_empty() {
        return 0.0;
    }
    needles.intersection(haystack).count() as f32 / needles.len() as f32
}
