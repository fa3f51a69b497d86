//! Retrieval evaluation across vector databases.
//!
//! For every question, each database is searched, the query and retrieved
//! chunks are embedded with a common [`Embedder`], and cosine similarity
//! between them is summarized by the [`QualityAnalyzer`]. Databases are
//! evaluated one at a time and yielded lazily by [`DatabaseEvaluations`].

use super::quality::{DocumentScore, QualityAnalyzer};
use super::similarity::cosine;
use crate::document::{Metadata, Question};
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::store::{Candidate, VectorDatabase, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Questions beyond this many are ignored for each database.
pub const MAX_QUESTIONS_PER_DATABASE: usize = 100;

/// Default number of candidates retrieved per question.
pub const DEFAULT_MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetrics {
    pub avg_similarity_score: f32,
    pub max_similarity_score: f32,
    pub min_similarity_score: f32,
    pub similarity_std: f32,
    pub retrieved_count: usize,
}

/// Evaluation of one question against one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: String,
    pub db_name: String,
    pub metrics: QuestionMetrics,
    pub documents: Vec<DocumentScore>,
}

/// A question that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionFailure {
    pub question: String,
    pub error: String,
}

/// All results for one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEvaluationResult {
    pub database: String,
    pub total_processed: usize,
    pub results: Vec<QuestionResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<QuestionFailure>,
}

impl DatabaseEvaluationResult {
    fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            total_processed: 0,
            results: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// What happened to a single question.
#[derive(Debug)]
pub enum QuestionOutcome {
    Evaluated(QuestionResult),
    /// No candidates were retrieved, or there was nothing to score.
    Skipped,
    Failed(RagError),
}

/// Embed `query` and each candidate, returning the similarity scores and the
/// candidates paired with their score, both in retrieval order.
pub fn score_candidates(
    embedder: &dyn Embedder,
    query: &str,
    candidates: Vec<Candidate>,
) -> Result<(Vec<f32>, Vec<DocumentScore>)> {
    let query_embedding = embedder.embed_query(query)?;
    let contents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
    let candidate_embeddings = embedder.embed_documents(&contents)?;
    if candidate_embeddings.len() != candidates.len() {
        return Err(RagError::Embedding(format!(
            "expected {} candidate embeddings, got {}",
            candidates.len(),
            candidate_embeddings.len()
        )));
    }

    let scores = cosine(&[query_embedding], &candidate_embeddings)?;
    let documents = candidates
        .into_iter()
        .zip(&scores)
        .map(|(c, &similarity)| DocumentScore {
            content: c.content,
            similarity,
            metadata: c.metadata,
        })
        .collect();
    Ok((scores, documents))
}

/// Evaluates vector databases against a question set.
pub struct VectorDbEvaluation<'a> {
    embedder: &'a dyn Embedder,
    analyzer: QualityAnalyzer,
    max_results: usize,
}

impl<'a> VectorDbEvaluation<'a> {
    pub fn new(embedder: &'a dyn Embedder, max_results: usize) -> Self {
        Self::with_analyzer(embedder, QualityAnalyzer::default(), max_results)
    }

    pub fn with_analyzer(embedder: &'a dyn Embedder, analyzer: QualityAnalyzer, max_results: usize) -> Self {
        Self {
            embedder,
            analyzer,
            max_results,
        }
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn analyzer(&self) -> &QualityAnalyzer {
        &self.analyzer
    }

    pub fn into_analyzer(self) -> QualityAnalyzer {
        self.analyzer
    }

    /// Search `db` for `question` and score what comes back.
    pub fn evaluate_question(&mut self, db_name: &str, db: &dyn VectorStore, question: &Question) -> QuestionOutcome {
        match self.score_question(db_name, db, &question.question) {
            Ok(Some(result)) => QuestionOutcome::Evaluated(result),
            Ok(None) => QuestionOutcome::Skipped,
            Err(e) => QuestionOutcome::Failed(e),
        }
    }

    fn score_question(&mut self, db_name: &str, db: &dyn VectorStore, query: &str) -> Result<Option<QuestionResult>> {
        let candidates = db.search(query, self.max_results)?;
        if candidates.is_empty() {
            debug!(database = db_name, question = query, "no candidates retrieved");
            return Ok(None);
        }

        let (scores, documents) = score_candidates(self.embedder, query, candidates)?;

        self.analyzer.start_operation("vector_search");
        let mut context = Metadata::new();
        context.insert("db_name".to_string(), Value::from(db_name));

        let Some(metrics) = self
            .analyzer
            .analyze_search_quality(query, &scores, documents, context)
        else {
            return Ok(None);
        };

        Ok(Some(QuestionResult {
            question: query.to_string(),
            db_name: db_name.to_string(),
            metrics: QuestionMetrics {
                avg_similarity_score: metrics.avg_similarity_score,
                max_similarity_score: metrics.max_similarity_score,
                min_similarity_score: metrics.min_similarity_score,
                similarity_std: metrics.similarity_std,
                retrieved_count: metrics.retrieved_count,
            },
            documents: metrics.documents,
        }))
    }

    /// Evaluate the first [`MAX_QUESTIONS_PER_DATABASE`] questions against
    /// one database.
    ///
    /// Failing questions are recorded and skipped; only a database that cannot
    /// serve queries at all is an error.
    pub fn evaluate_database(
        &mut self,
        db_name: &str,
        db: &dyn VectorStore,
        questions: &[Question],
    ) -> Result<DatabaseEvaluationResult> {
        db.ensure_ready()?;

        let mut result = DatabaseEvaluationResult::new(db_name);
        let limit = questions.len().min(MAX_QUESTIONS_PER_DATABASE);
        info!(database = db_name, questions = limit, "evaluating database");

        for question in &questions[..limit] {
            match self.evaluate_question(db_name, db, question) {
                QuestionOutcome::Evaluated(r) => {
                    result.results.push(r);
                    result.total_processed += 1;
                }
                QuestionOutcome::Skipped => {}
                QuestionOutcome::Failed(e) => {
                    error!(
                        database = db_name,
                        question = %question.question,
                        error = %e,
                        "error processing question"
                    );
                    result.failures.push(QuestionFailure {
                        question: question.question.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            database = db_name,
            processed = result.total_processed,
            failed = result.failures.len(),
            "finished database"
        );
        Ok(result)
    }

    /// Evaluate every database in turn.
    ///
    /// Fails before doing any work when there are no databases or no
    /// questions. Databases that fail are logged and left out of the output.
    pub fn execute<'e>(
        &'e mut self,
        vector_dbs: &'e [VectorDatabase],
        questions: &'e [Question],
    ) -> Result<DatabaseEvaluations<'e, 'a>> {
        if vector_dbs.is_empty() {
            return Err(RagError::NoDatabases);
        }
        if questions.is_empty() {
            return Err(RagError::NoQuestions);
        }

        info!(
            databases = vector_dbs.len(),
            questions = questions.len(),
            "starting vector database evaluation"
        );

        Ok(DatabaseEvaluations {
            evaluation: self,
            databases: vector_dbs.iter(),
            questions,
            failed: Vec::new(),
            succeeded: 0,
            reported: false,
        })
    }
}

/// Lazily evaluates databases, yielding one result per database that could
/// be evaluated.
pub struct DatabaseEvaluations<'e, 'a> {
    evaluation: &'e mut VectorDbEvaluation<'a>,
    databases: std::slice::Iter<'e, VectorDatabase>,
    questions: &'e [Question],
    failed: Vec<String>,
    succeeded: usize,
    reported: bool,
}

impl DatabaseEvaluations<'_, '_> {
    /// Names of databases that failed so far.
    pub fn failed(&self) -> &[String] {
        &self.failed
    }
}

impl Iterator for DatabaseEvaluations<'_, '_> {
    type Item = DatabaseEvaluationResult;

    fn next(&mut self) -> Option<Self::Item> {
        for db in self.databases.by_ref() {
            match self
                .evaluation
                .evaluate_database(&db.name, db.store.as_ref(), self.questions)
            {
                Ok(result) => {
                    self.succeeded += 1;
                    return Some(result);
                }
                Err(e) => {
                    error!(database = %db.name, error = %e, "error evaluating database");
                    self.failed.push(db.name.clone());
                }
            }
        }

        if !self.reported && !self.failed.is_empty() {
            warn!(
                failed = self.failed.len(),
                succeeded = self.succeeded,
                databases = ?self.failed,
                "some databases failed evaluation"
            );
        }
        self.reported = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    /// Looks embeddings up in a fixed table.
    struct TableEmbedder(HashMap<String, Vec<f32>>);

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
        }
    }

    impl Embedder for TableEmbedder {
        fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            self.0
                .get(text)
                .cloned()
                .ok_or_else(|| RagError::Embedding(format!("unknown text '{}'", text)))
        }

        fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            texts.iter().map(|t| self.embed_query(t)).collect()
        }
    }

    /// Returns the same candidates for every query.
    struct FixedStore {
        candidates: Vec<Candidate>,
        ready: bool,
    }

    impl FixedStore {
        fn new(contents: &[&str]) -> Self {
            Self {
                candidates: contents.iter().map(|c| Candidate::new(*c)).collect(),
                ready: true,
            }
        }

        fn broken() -> Self {
            Self {
                candidates: Vec::new(),
                ready: false,
            }
        }
    }

    impl VectorStore for FixedStore {
        fn search(&self, query: &str, max_results: usize) -> Result<Vec<Candidate>> {
            if query == "explode" {
                return Err(RagError::Http("connection reset".to_string()));
            }
            Ok(self.candidates.iter().take(max_results).cloned().collect())
        }

        fn ensure_ready(&self) -> Result<()> {
            if self.ready {
                Ok(())
            } else {
                Err(RagError::IndexNotLoaded("broken".to_string()))
            }
        }
    }

    fn scenario_embedder() -> TableEmbedder {
        TableEmbedder::new(&[
            ("q", vec![1.0, 0.0]),
            ("explode", vec![1.0, 0.0]),
            ("doc a", vec![0.9, 0.19f32.sqrt()]),
            ("doc b", vec![0.3, 0.91f32.sqrt()]),
        ])
    }

    #[test]
    fn test_similarity_scenario() {
        let embedder = scenario_embedder();
        let store = FixedStore::new(&["doc a", "doc b"]);
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        let result = evaluation
            .evaluate_database("faiss", &store, &[Question::new("q")])
            .unwrap();

        assert_eq!(result.database, "faiss");
        assert_eq!(result.total_processed, 1);
        let metrics = &result.results[0].metrics;
        assert_eq!(metrics.retrieved_count, 2);
        assert!((metrics.avg_similarity_score - 0.6).abs() < 1e-5);
        assert!((metrics.max_similarity_score - 0.9).abs() < 1e-5);
        assert!((metrics.min_similarity_score - 0.3).abs() < 1e-5);

        let documents = &result.results[0].documents;
        assert_eq!(documents[0].content, "doc a");
        assert!((documents[0].similarity - 0.9).abs() < 1e-5);
        assert_eq!(result.results[0].db_name, "faiss");
    }

    #[test]
    fn test_question_cap() {
        let embedder = scenario_embedder();
        let store = FixedStore::new(&["doc a"]);
        let questions = vec![Question::new("q"); MAX_QUESTIONS_PER_DATABASE + 20];
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        let result = evaluation.evaluate_database("db", &store, &questions).unwrap();
        assert_eq!(result.total_processed, MAX_QUESTIONS_PER_DATABASE);
        assert_eq!(result.total_processed, result.results.len());
    }

    #[test]
    fn test_zero_candidates_skipped() {
        let embedder = scenario_embedder();
        let store = FixedStore::new(&[]);
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        let result = evaluation
            .evaluate_database("empty", &store, &[Question::new("q")])
            .unwrap();
        assert_eq!(result.total_processed, 0);
        assert!(result.results.is_empty());
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_failing_question_is_isolated() {
        let embedder = scenario_embedder();
        let store = FixedStore::new(&["doc a", "doc b"]);
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        let questions = [Question::new("explode"), Question::new("q")];
        let result = evaluation.evaluate_database("db", &store, &questions).unwrap();

        assert_eq!(result.total_processed, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].question, "explode");
        assert!(matches!(
            evaluation.evaluate_question("db", &store, &questions[0]),
            QuestionOutcome::Failed(RagError::Http(_))
        ));
    }

    #[test]
    fn test_unknown_embedding_fails_question() {
        let embedder = scenario_embedder();
        let store = FixedStore::new(&["unknown chunk"]);
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        let outcome = evaluation.evaluate_question("db", &store, &Question::new("q"));
        assert!(matches!(outcome, QuestionOutcome::Failed(RagError::Embedding(_))));
    }

    #[test]
    fn test_max_results_limits_candidates() {
        let embedder = scenario_embedder();
        let store = FixedStore::new(&["doc a", "doc b"]);
        let mut evaluation = VectorDbEvaluation::new(&embedder, 1);

        let result = evaluation
            .evaluate_database("db", &store, &[Question::new("q")])
            .unwrap();
        assert_eq!(result.results[0].metrics.retrieved_count, 1);
    }

    #[test]
    fn test_execute_excludes_failed_database() {
        let embedder = scenario_embedder();
        let dbs = vec![
            VectorDatabase::new("alpha", Box::new(FixedStore::new(&["doc a"]))),
            VectorDatabase::new("broken", Box::new(FixedStore::broken())),
            VectorDatabase::new("gamma", Box::new(FixedStore::new(&["doc b"]))),
        ];
        let questions = [Question::new("q")];
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        let mut evaluations = evaluation.execute(&dbs, &questions).unwrap();
        let names: Vec<String> = evaluations.by_ref().map(|r| r.database).collect();

        assert_eq!(names, vec!["alpha", "gamma"]);
        assert_eq!(evaluations.failed().to_vec(), vec!["broken".to_string()]);
        assert!(evaluations.next().is_none());
    }

    /// Counts how often it is searched.
    struct CountingStore {
        searches: Rc<Cell<usize>>,
    }

    impl VectorStore for CountingStore {
        fn search(&self, _query: &str, max_results: usize) -> Result<Vec<Candidate>> {
            self.searches.set(self.searches.get() + 1);
            Ok([Candidate::new("doc a")].into_iter().take(max_results).collect())
        }
    }

    /// Shared in-memory sink for captured log output.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_execute_is_lazy_and_warns_once() {
        let embedder = scenario_embedder();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        let dbs = vec![
            VectorDatabase::new(
                "first",
                Box::new(CountingStore {
                    searches: Rc::clone(&first),
                }),
            ),
            VectorDatabase::new("broken", Box::new(FixedStore::broken())),
            VectorDatabase::new(
                "second",
                Box::new(CountingStore {
                    searches: Rc::clone(&second),
                }),
            ),
        ];
        let questions = [Question::new("q"), Question::new("q")];

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut evaluation = VectorDbEvaluation::new(&embedder, 5);
            let mut evaluations = evaluation.execute(&dbs, &questions).unwrap();
            assert_eq!(first.get(), 0);

            let result = evaluations.next().unwrap();
            assert_eq!(result.database, "first");
            assert_eq!(first.get(), 2);
            assert_eq!(second.get(), 0);

            let result = evaluations.next().unwrap();
            assert_eq!(result.database, "second");
            assert_eq!(second.get(), 2);
            assert_eq!(evaluations.failed().to_vec(), vec!["broken".to_string()]);

            assert!(evaluations.next().is_none());
            assert!(evaluations.reported);
            assert!(evaluations.next().is_none());
            assert!(evaluations.next().is_none());
        });

        let output = logs.contents();
        assert_eq!(output.matches("some databases failed evaluation").count(), 1);
        assert_eq!(output.matches("error evaluating database").count(), 1);
    }

    #[test]
    fn test_execute_requires_databases_and_questions() {
        let embedder = scenario_embedder();
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        assert!(matches!(
            evaluation.execute(&[], &[Question::new("q")]),
            Err(RagError::NoDatabases)
        ));

        let dbs = vec![VectorDatabase::new("alpha", Box::new(FixedStore::new(&["doc a"])))];
        assert!(matches!(evaluation.execute(&dbs, &[]), Err(RagError::NoQuestions)));
    }

    #[test]
    fn test_analyzer_history_records_every_search() {
        let embedder = scenario_embedder();
        let store = FixedStore::new(&["doc a", "doc b"]);
        let mut evaluation = VectorDbEvaluation::new(&embedder, 5);

        evaluation
            .evaluate_database("db", &store, &[Question::new("q"), Question::new("q")])
            .unwrap();

        let history = evaluation.analyzer().history();
        assert_eq!(history.searches().len(), 2);
        assert_eq!(history.searches()[0].metadata["db_name"], "db");
    }
}
