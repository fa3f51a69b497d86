//! Evaluation question generation.
//!
//! Each source document is shown to a language model, which proposes
//! questions answerable from it. Generated questions carry the fields of the
//! document they came from so results can be traced back to the source.

use crate::document::{Metadata, Question, SourceDocument};
use crate::error::{RagError, Result};
use crate::llm::json::parse_json;
use crate::llm::{LanguageModel, Prompts};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct GeneratedQuestions {
    #[serde(default)]
    questions: Vec<GeneratedQuestion>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeneratedQuestion {
    Text(String),
    Object { question: String },
}

impl GeneratedQuestion {
    fn into_text(self) -> String {
        match self {
            Self::Text(q) | Self::Object { question: q } => q,
        }
    }
}

/// Generates questions from documents with a language model.
pub struct QuestionGenerator<M> {
    model: M,
}

impl<M: LanguageModel> QuestionGenerator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Generate questions for one document.
    pub async fn generate(&self, document: &SourceDocument) -> Result<Vec<Question>> {
        let text = document
            .content()
            .ok_or_else(|| RagError::MissingText(document.id().unwrap_or_default()))?;
        let prompt = Prompts::render(Prompts::question_generation(), &[("text", text)]);
        let response = self.model.complete(&prompt).await?;
        if response.trim().is_empty() {
            return Err(RagError::EmptyResponse);
        }

        let generated: GeneratedQuestions = parse_json(&response)?;
        let source_fields = document_fields(document)?;

        let questions: Vec<Question> = generated
            .questions
            .into_iter()
            .map(GeneratedQuestion::into_text)
            .filter(|q| !q.trim().is_empty())
            .map(|question| Question {
                question,
                fields: source_fields.clone(),
            })
            .collect();

        if questions.is_empty() {
            return Err(RagError::EmptyQuestions);
        }
        Ok(questions)
    }

    /// Generate questions for every document, passing each one to `sink`.
    ///
    /// A document that fails is logged and skipped; once all documents have
    /// been tried, any failures are reported as
    /// [`RagError::QuestionGeneration`]. Errors from `sink` abort immediately.
    pub async fn generate_all<F>(&self, documents: &[SourceDocument], mut sink: F) -> Result<usize>
    where
        F: FnMut(&Question) -> Result<()>,
    {
        let mut written = 0;
        let mut failed = 0;

        for (i, document) in documents.iter().enumerate() {
            let doc_id = document.id().unwrap_or_else(|| i.to_string());
            match self.generate(document).await {
                Ok(questions) => {
                    for question in &questions {
                        sink(question)?;
                    }
                    written += questions.len();
                    info!(document = %doc_id, questions = questions.len(), "generated questions");
                }
                Err(e) => {
                    failed += 1;
                    error!(document = %doc_id, error = %e, "failed to generate questions");
                }
            }
        }

        if failed > 0 {
            warn!(failed, total = documents.len(), "question generation finished with failures");
            return Err(RagError::QuestionGeneration {
                failed,
                succeeded: documents.len() - failed,
            });
        }
        Ok(written)
    }
}

/// All fields of the source record, as they would appear in the dataset.
fn document_fields(document: &SourceDocument) -> Result<Metadata> {
    match serde_json::to_value(document)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Metadata::new()),
    }
}
