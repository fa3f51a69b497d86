//! Retrieval-augmented question answering.
//!
//! Retrieval and generation are separate steps: [`SimpleRag::retrieve`] is
//! synchronous like the rest of the retrieval stack, while
//! [`SimpleRag::answer`] awaits the language model.

use crate::document::Metadata;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::eval::{OperationOutcome, QualityAnalyzer, SearchQualityMetrics, score_candidates};
use crate::llm::{LanguageModel, Prompts};
use crate::store::{Candidate, VectorStore};
use tracing::info;

const VECTOR_SEARCH: &str = "vector_search";

/// Answers questions from the chunks of one vector store.
pub struct SimpleRag<'a, M> {
    store: &'a dyn VectorStore,
    model: M,
    max_results: usize,
}

impl<'a, M: LanguageModel> SimpleRag<'a, M> {
    pub fn new(store: &'a dyn VectorStore, model: M, max_results: usize) -> Self {
        Self {
            store,
            model,
            max_results,
        }
    }

    /// Fetch the chunks most relevant to `question`.
    pub fn retrieve(&self, question: &str) -> Result<Vec<Candidate>> {
        let candidates = self.store.search(question, self.max_results)?;
        info!(question, retrieved = candidates.len(), "retrieved context");
        Ok(candidates)
    }

    /// Retrieve chunks for `question` and record their search quality.
    ///
    /// The `vector_search` operation is always finished: by the analysis
    /// when chunks come back, otherwise as a failure.
    pub fn retrieve_analyzed(
        &self,
        question: &str,
        embedder: &dyn Embedder,
        analyzer: &mut QualityAnalyzer,
        context: Metadata,
    ) -> Result<(Vec<Candidate>, Option<SearchQualityMetrics>)> {
        analyzer.start_operation(VECTOR_SEARCH);

        let scored = self.retrieve(question).and_then(|candidates| {
            if candidates.is_empty() {
                return Ok((candidates, None));
            }
            let scored = score_candidates(embedder, question, candidates.clone())?;
            Ok((candidates, Some(scored)))
        });

        match scored {
            Ok((candidates, Some((scores, documents)))) => {
                let search = analyzer.analyze_search_quality(question, &scores, documents, context);
                Ok((candidates, search))
            }
            Ok((candidates, None)) => {
                analyzer.end_operation(
                    VECTOR_SEARCH,
                    OperationOutcome::Failure("no chunks retrieved".to_string()),
                    Metadata::new(),
                );
                Ok((candidates, None))
            }
            Err(e) => {
                analyzer.end_operation(VECTOR_SEARCH, OperationOutcome::Failure(e.to_string()), Metadata::new());
                Err(e)
            }
        }
    }

    /// Ask the model to answer `question` from `candidates`.
    pub async fn answer(&self, question: &str, candidates: &[Candidate]) -> Result<String> {
        let context = format_context(candidates);
        let prompt = Prompts::render(
            Prompts::rag_answer(),
            &[("question", question), ("context", context.as_str())],
        );
        let answer = self.model.complete(&prompt).await?;
        Ok(answer.trim().to_string())
    }
}

/// Render chunks as numbered blocks, metadata first.
pub fn format_context(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let metadata = serde_json::Value::Object(c.metadata.clone());
            format!(
                "\n#### {} Relevant chunk ####\n{}\n{}\n",
                i + 1,
                metadata,
                c.content
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use serde_json::Value;

    struct StaticStore(Vec<Candidate>);

    impl VectorStore for StaticStore {
        fn search(&self, _query: &str, max_results: usize) -> Result<Vec<Candidate>> {
            Ok(self.0.iter().take(max_results).cloned().collect())
        }
    }

    /// Echoes the prompt back so tests can inspect it.
    struct EchoModel;

    impl LanguageModel for EchoModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            Ok(format!("  {}  ", prompt))
        }
    }

    struct FailingModel;

    impl LanguageModel for FailingModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(RagError::LlmApi("unavailable".to_string()))
        }
    }

    /// Counts of the letters a, b and c.
    struct LetterEmbedder;

    impl Embedder for LetterEmbedder {
        fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(['a', 'b', 'c']
                .iter()
                .map(|l| text.chars().filter(|c| c == l).count() as f32)
                .collect())
        }

        fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            texts.iter().map(|t| self.embed_query(t)).collect()
        }
    }

    struct BrokenStore;

    impl VectorStore for BrokenStore {
        fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<Candidate>> {
            Err(RagError::Http("connection refused".to_string()))
        }
    }

    fn candidate(content: &str, source: &str) -> Candidate {
        let mut c = Candidate::new(content);
        c.metadata.insert("source".to_string(), Value::from(source));
        c
    }

    #[test]
    fn test_format_context() {
        let context = format_context(&[candidate("first", "a.md"), candidate("second", "b.md")]);
        assert_eq!(
            context,
            "\n#### 1 Relevant chunk ####\n{\"source\":\"a.md\"}\nfirst\n\
             \n#### 2 Relevant chunk ####\n{\"source\":\"b.md\"}\nsecond\n"
        );
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_retrieve_respects_max_results() {
        let store = StaticStore(vec![candidate("a", "1"), candidate("b", "2"), candidate("c", "3")]);
        let rag = SimpleRag::new(&store, EchoModel, 2);
        assert_eq!(rag.retrieve("q").unwrap().len(), 2);
    }

    #[test]
    fn test_answer_uses_retrieved_chunks() {
        let store = StaticStore(vec![candidate("Paris is in France", "geo.md")]);
        let rag = SimpleRag::new(&store, EchoModel, 5);

        let candidates = rag.retrieve("Where is Paris?").unwrap();
        let answer = tokio_test::block_on(rag.answer("Where is Paris?", &candidates)).unwrap();

        assert!(answer.starts_with("Answer the question"));
        assert!(answer.contains("Question: Where is Paris?"));
        assert!(answer.contains("#### 1 Relevant chunk ####"));
        assert!(answer.contains("Paris is in France"));
    }

    #[test]
    fn test_answer_propagates_model_errors() {
        let store = StaticStore(Vec::new());
        let rag = SimpleRag::new(&store, FailingModel, 5);
        let result = tokio_test::block_on(rag.answer("q", &[]));
        assert!(matches!(result, Err(RagError::LlmApi(_))));
    }

    #[test]
    fn test_retrieve_analyzed_scores_chunks() {
        let store = StaticStore(vec![candidate("aaa", "a.md"), candidate("abc", "b.md")]);
        let rag = SimpleRag::new(&store, EchoModel, 5);
        let mut analyzer = QualityAnalyzer::default();

        let (candidates, search) = rag
            .retrieve_analyzed("aa", &LetterEmbedder, &mut analyzer, Metadata::new())
            .unwrap();

        assert_eq!(candidates.len(), 2);
        let search = search.unwrap();
        assert_eq!(search.retrieved_count, 2);
        assert!((search.max_similarity_score - 1.0).abs() < 1e-6);

        let op = analyzer.operations().get("vector_search").unwrap();
        assert_eq!(op.outcome, Some(OperationOutcome::Success));
    }

    #[test]
    fn test_retrieve_analyzed_finishes_operation_without_chunks() {
        let store = StaticStore(Vec::new());
        let rag = SimpleRag::new(&store, EchoModel, 5);
        let mut analyzer = QualityAnalyzer::default();

        let (candidates, search) = rag
            .retrieve_analyzed("aa", &LetterEmbedder, &mut analyzer, Metadata::new())
            .unwrap();

        assert!(candidates.is_empty());
        assert!(search.is_none());
        assert!(analyzer.history().searches().is_empty());

        let op = analyzer.operations().get("vector_search").unwrap();
        assert!(op.is_finished());
        assert_eq!(
            op.outcome,
            Some(OperationOutcome::Failure("no chunks retrieved".to_string()))
        );
    }

    #[test]
    fn test_retrieve_analyzed_finishes_operation_on_error() {
        let rag = SimpleRag::new(&BrokenStore, EchoModel, 5);
        let mut analyzer = QualityAnalyzer::default();

        let result = rag.retrieve_analyzed("aa", &LetterEmbedder, &mut analyzer, Metadata::new());
        assert!(matches!(result, Err(RagError::Http(_))));

        let op = analyzer.operations().get("vector_search").unwrap();
        assert!(matches!(op.outcome, Some(OperationOutcome::Failure(_))));
    }
}
