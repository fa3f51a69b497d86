//! Aggregation and export of evaluation results.

use super::evaluator::{DatabaseEvaluationResult, QuestionResult};
use crate::error::{RagError, Result};
use crate::persistence::ensure_parent_dir;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

const TABLE_HEADERS: [&str; 6] = [
    "Database",
    "Questions Processed",
    "Average Similarity",
    "Max Similarity",
    "Min Similarity",
    "Standard Deviation",
];

/// Per-database statistics, each the mean of the per-question values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub total: usize,
    pub avg_similarity: f32,
    pub max_similarity: f32,
    pub min_similarity: f32,
    pub std_similarity: f32,
}

/// Average the per-question statistics of `results`.
pub fn calculate_metrics_from_results(results: &[QuestionResult]) -> AggregatedMetrics {
    if results.is_empty() {
        return AggregatedMetrics::default();
    }

    let n = results.len() as f32;
    let mean = |f: fn(&QuestionResult) -> f32| results.iter().map(f).sum::<f32>() / n;

    AggregatedMetrics {
        total: results.len(),
        avg_similarity: mean(|r| r.metrics.avg_similarity_score),
        max_similarity: mean(|r| r.metrics.max_similarity_score),
        min_similarity: mean(|r| r.metrics.min_similarity_score),
        std_similarity: mean(|r| r.metrics.similarity_std),
    }
}

/// One row of the summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub database: String,
    pub questions_processed: usize,
    pub metrics: AggregatedMetrics,
}

impl SummaryRow {
    fn cells(&self) -> Vec<String> {
        vec![
            self.database.clone(),
            self.questions_processed.to_string(),
            format!("{:.4}", self.metrics.avg_similarity),
            format!("{:.4}", self.metrics.max_similarity),
            format!("{:.4}", self.metrics.min_similarity),
            format!("{:.4}", self.metrics.std_similarity),
        ]
    }
}

/// The full output of an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// ISO-8601 time the report was created.
    pub timestamp: String,
    pub databases: Vec<DatabaseEvaluationResult>,
}

impl EvaluationReport {
    pub fn new(databases: Vec<DatabaseEvaluationResult>) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            databases,
        }
    }

    /// Rows for databases that processed at least one question.
    pub fn summary_rows(&self) -> Vec<SummaryRow> {
        self.databases
            .iter()
            .filter(|db| db.total_processed > 0)
            .map(|db| SummaryRow {
                database: db.database.clone(),
                questions_processed: db.total_processed,
                metrics: calculate_metrics_from_results(&db.results),
            })
            .collect()
    }

    /// Render the summary rows as a grid table.
    pub fn render_table(&self) -> String {
        let header: Vec<String> = TABLE_HEADERS.iter().map(|h| h.to_string()).collect();
        let rows: Vec<Vec<String>> = self.summary_rows().iter().map(SummaryRow::cells).collect();

        let widths: Vec<usize> = (0..header.len())
            .map(|i| {
                rows.iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(header[i].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let rule = |fill: char| {
            let mut line = String::from("+");
            for w in &widths {
                line.push_str(&fill.to_string().repeat(w + 2));
                line.push('+');
            }
            line.push('\n');
            line
        };

        // Database names are left-aligned, numbers right-aligned.
        let render_row = |cells: &[String], align_numbers: bool| {
            let mut line = String::from("|");
            for (i, (cell, w)) in cells.iter().zip(&widths).enumerate() {
                if align_numbers && i > 0 {
                    line.push_str(&format!(" {:>width$} |", cell, width = w));
                } else {
                    line.push_str(&format!(" {:<width$} |", cell, width = w));
                }
            }
            line.push('\n');
            line
        };

        let mut out = rule('-');
        out.push_str(&render_row(&header, false));
        out.push_str(&rule('='));
        for row in &rows {
            out.push_str(&render_row(row, true));
            out.push_str(&rule('-'));
        }
        out
    }

    /// Write the full report, including per-question detail, as JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let write = || -> Result<()> {
            ensure_parent_dir(path)?;
            let json = serde_json::to_string_pretty(self)?;
            fs::write(path, json).map_err(|e| RagError::io(path, e))
        };
        write().map_err(|e| RagError::export(path, e))?;
        info!(path = %path.display(), "saved JSON results");
        Ok(())
    }

    /// Write the summary table as CSV.
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let header: Vec<String> = TABLE_HEADERS.iter().map(|h| h.to_string()).collect();
        let mut csv = csv_record(&header);
        for row in self.summary_rows() {
            csv.push_str(&csv_record(&row.cells()));
        }

        ensure_parent_dir(path)
            .and_then(|_| fs::write(path, csv).map_err(|e| RagError::io(path, e)))
            .map_err(|e| RagError::export(path, e))?;
        info!(path = %path.display(), "saved CSV results");
        Ok(())
    }
}

/// Read back a report written by [`EvaluationReport::save_json`].
pub fn load_report(path: &Path) -> Result<EvaluationReport> {
    if !path.is_file() {
        return Err(RagError::FileNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// `vector_db_evaluation_<YYYYmmdd_HHMMSS>`
pub fn default_output_name() -> String {
    format!("vector_db_evaluation_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Join `fields` into one CSV line, quoting where needed.
pub(crate) fn csv_record(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluator::QuestionMetrics;
    use tempfile::TempDir;

    fn result(avg: f32, max: f32, min: f32, std: f32) -> QuestionResult {
        QuestionResult {
            question: "q".to_string(),
            db_name: "db".to_string(),
            metrics: QuestionMetrics {
                avg_similarity_score: avg,
                max_similarity_score: max,
                min_similarity_score: min,
                similarity_std: std,
                retrieved_count: 2,
            },
            documents: Vec::new(),
        }
    }

    fn database(name: &str, results: Vec<QuestionResult>) -> DatabaseEvaluationResult {
        DatabaseEvaluationResult {
            database: name.to_string(),
            total_processed: results.len(),
            results,
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_empty_results_aggregate_to_zero() {
        assert_eq!(calculate_metrics_from_results(&[]), AggregatedMetrics::default());
        assert_eq!(AggregatedMetrics::default().total, 0);
    }

    #[test]
    fn test_mean_of_means() {
        let results = vec![result(0.6, 0.9, 0.3, 0.3), result(0.4, 0.5, 0.3, 0.1)];
        let agg = calculate_metrics_from_results(&results);

        assert_eq!(agg.total, results.len());
        assert!((agg.avg_similarity - 0.5).abs() < 1e-6);
        assert!((agg.max_similarity - 0.7).abs() < 1e-6);
        assert!((agg.min_similarity - 0.3).abs() < 1e-6);
        assert!((agg.std_similarity - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_table_skips_empty_databases() {
        let report = EvaluationReport::new(vec![
            database("chroma", vec![result(0.6, 0.9, 0.3, 0.3)]),
            database("empty", Vec::new()),
        ]);

        let rows = report.summary_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].database, "chroma");

        let table = report.render_table();
        assert!(table.contains("| Database "));
        assert!(table.contains("Standard Deviation"));
        assert!(table.contains("0.6000"));
        assert!(!table.contains("empty"));
        assert!(table.lines().nth(2).unwrap().starts_with("+="));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/report.json");
        let report = EvaluationReport::new(vec![
            database("faiss", vec![result(0.6, 0.9, 0.3, 0.3), result(0.1, 0.2, 0.0, 0.1)]),
            database("empty", Vec::new()),
        ]);

        report.save_json(&path).unwrap();
        let loaded = load_report(&path).unwrap();

        assert_eq!(loaded.timestamp, report.timestamp);
        assert_eq!(loaded.databases.len(), 2);
        assert_eq!(loaded.databases[0].database, "faiss");
        assert_eq!(loaded.databases[0].total_processed, 2);
        assert_eq!(loaded.databases[0].results.len(), 2);
        assert_eq!(loaded.databases[1].total_processed, 0);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("failures"));
    }

    #[test]
    fn test_save_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        let report = EvaluationReport::new(vec![database("a,b", vec![result(0.6, 0.9, 0.3, 0.3)])]);

        report.save_csv(&path).unwrap();
        let csv = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Database,Questions Processed,Average Similarity,Max Similarity,Min Similarity,Standard Deviation");
        assert_eq!(lines[1], "\"a,b\",1,0.6000,0.9000,0.3000,0.3000");
    }

    #[test]
    fn test_export_error_is_distinct() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let report = EvaluationReport::new(Vec::new());
        let err = report.save_json(&blocker.join("report.json")).unwrap_err();
        assert!(matches!(err, RagError::Export { .. }));
    }

    #[test]
    fn test_load_missing_report() {
        assert!(matches!(
            load_report(Path::new("/nonexistent/report.json")),
            Err(RagError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_default_output_name() {
        let name = default_output_name();
        assert!(name.starts_with("vector_db_evaluation_"));
        assert_eq!(name.len(), "vector_db_evaluation_".len() + 15);
    }
}
