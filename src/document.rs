//! Source documents and question sets.
//!
//! Datasets are JSON files holding an array of documents (a single object is
//! accepted as a one-document dataset). Question sets are newline-delimited
//! JSON, one object per line with at least a `question` field.

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Free-form metadata attached to documents, chunks and questions.
pub type Metadata = Map<String, Value>;

/// Which rendition of a document's text to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextFormat {
    Plain,
    Html,
    Markdown,
}

impl TextFormat {
    pub const ALL: [TextFormat; 3] = [TextFormat::Plain, TextFormat::Html, TextFormat::Markdown];

    /// Dataset field holding this rendition.
    pub fn field(self) -> &'static str {
        match self {
            TextFormat::Plain => "text",
            TextFormat::Html => "text_html",
            TextFormat::Markdown => "text_markdown",
        }
    }

    /// Short suffix used in database names.
    pub fn suffix(self) -> &'static str {
        match self {
            TextFormat::Plain => "text",
            TextFormat::Html => "html",
            TextFormat::Markdown => "md",
        }
    }
}

/// A document to be indexed or used for question generation.
///
/// A record carries at least one of `text`, `text_html` and `text_markdown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Plain text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// HTML rendition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_html: Option<String>,
    /// Markdown rendition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_markdown: Option<String>,
    /// Metadata copied onto every chunk of this document.
    #[serde(default)]
    pub metadata: Metadata,
    /// Any other fields of the source record.
    #[serde(flatten)]
    pub extra: Metadata,
}

impl SourceDocument {
    /// Create a plain-text document with empty metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            text_html: None,
            text_markdown: None,
            metadata: Metadata::new(),
            extra: Metadata::new(),
        }
    }

    /// Value of the `id` field, if the source record carries one.
    pub fn id(&self) -> Option<String> {
        self.extra.get("id").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// The rendition in `format`, if present.
    pub fn text_for(&self, format: TextFormat) -> Option<&str> {
        match format {
            TextFormat::Plain => self.text.as_deref(),
            TextFormat::Html => self.text_html.as_deref(),
            TextFormat::Markdown => self.text_markdown.as_deref(),
        }
    }

    /// First available rendition: plain text, then markdown, then HTML.
    pub fn content(&self) -> Option<&str> {
        [TextFormat::Plain, TextFormat::Markdown, TextFormat::Html]
            .into_iter()
            .find_map(|format| self.text_for(format))
    }

    /// Chunk metadata for auto indexing: `metadata` plus the other record fields.
    pub fn record_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();
        for (key, value) in &self.extra {
            metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }
        metadata
    }
}

/// A single evaluation question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// The question text.
    pub question: String,
    /// Fields of the source record, passed through untouched.
    #[serde(flatten)]
    pub fields: Metadata,
}

impl Question {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            fields: Metadata::new(),
        }
    }
}

/// Load a dataset of documents from a JSON file.
pub fn load_documents(path: &Path) -> Result<Vec<SourceDocument>> {
    if !path.is_file() {
        return Err(RagError::FileNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        RagError::Serialization(format!("Failed to parse dataset {:?}: {}", path, e))
    })?;

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let document: SourceDocument = serde_json::from_value(item).map_err(|e| {
                RagError::Serialization(format!("Invalid document #{} in {:?}: {}", i + 1, path, e))
            })?;
            if document.content().is_none() {
                return Err(RagError::MissingText(
                    document.id().unwrap_or_else(|| format!("#{}", i + 1)),
                ));
            }
            Ok(document)
        })
        .collect()
}

/// Load questions from a newline-delimited JSON file.
pub fn load_questions(path: &Path) -> Result<Vec<Question>> {
    if !path.is_file() {
        return Err(RagError::FileNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
    parse_questions(&content)
}

/// Parse newline-delimited JSON questions. Blank lines are ignored.
pub fn parse_questions(content: &str) -> Result<Vec<Question>> {
    let mut questions = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let question: Question = serde_json::from_str(line).map_err(|e| {
            RagError::Serialization(format!(
                "Failed to parse question at line {}: {}",
                line_num + 1,
                e
            ))
        })?;
        questions.push(question);
    }

    Ok(questions)
}

/// Write questions as newline-delimited JSON, one compact object per line.
pub fn write_questions<'a, I>(path: &Path, questions: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a Question>,
{
    let file = fs::File::create(path).map_err(|e| RagError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;

    for question in questions {
        append_question(&mut writer, question).map_err(|e| RagError::io(path, e))?;
        count += 1;
    }

    writer.flush().map_err(|e| RagError::io(path, e))?;
    Ok(count)
}

/// Append a single question line to an open writer.
pub fn append_question<W: Write>(writer: &mut W, question: &Question) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, question)?;
    writer.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_questions_keeps_extra_fields() {
        let content = r#"{"question": "What is Rust?", "id": "doc-1", "text": "Rust is a language."}

{"question": "Who made it?"}
"#;
        let questions = parse_questions(content).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question, "What is Rust?");
        assert_eq!(questions[0].fields["id"], "doc-1");
        assert!(questions[1].fields.is_empty());
    }

    #[test]
    fn test_parse_questions_reports_line() {
        let content = "{\"question\": \"ok\"}\n{\"nope\": 1}\n";
        let err = parse_questions(content).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_questions_missing_file() {
        let err = load_questions(Path::new("/nonexistent/questions.json")).unwrap_err();
        assert!(matches!(err, RagError::FileNotFound(_)));
    }

    #[test]
    fn test_write_then_load_questions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("questions.json");

        let mut q = Question::new("What is ownership?");
        q.fields.insert("id".to_string(), Value::from(7));
        write_questions(&path, &[q.clone(), Question::new("Second?")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let loaded = load_questions(&path).unwrap();
        assert_eq!(loaded[0], q);
    }

    #[test]
    fn test_load_documents_array_and_single() {
        let dir = TempDir::new().unwrap();

        let array = dir.path().join("array.json");
        fs::write(
            &array,
            r#"[{"text": "one", "metadata": {"source": "a"}, "id": 1}, {"text": "two"}]"#,
        )
        .unwrap();
        let docs = load_documents(&array).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata["source"], "a");
        assert_eq!(docs[0].id().as_deref(), Some("1"));
        assert!(docs[1].metadata.is_empty());

        let single = dir.path().join("single.json");
        fs::write(&single, r#"{"text": "only"}"#).unwrap();
        assert_eq!(load_documents(&single).unwrap().len(), 1);
    }

    #[test]
    fn test_load_documents_requires_some_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"[{"text": "fine"}, {"title": "no text", "id": "x9"}]"#).unwrap();
        let err = load_documents(&path).unwrap_err();
        assert!(matches!(err, RagError::MissingText(ref id) if id == "x9"));
    }

    #[test]
    fn test_load_documents_with_only_rich_renditions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rich.json");
        fs::write(
            &path,
            r##"[{"id": 1, "text_markdown": "# T\nbody", "text_html": "<h1>T</h1><p>body</p>"}]"##,
        )
        .unwrap();

        let docs = load_documents(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.is_none());
        assert_eq!(docs[0].text_for(TextFormat::Markdown), Some("# T\nbody"));
        assert_eq!(docs[0].text_for(TextFormat::Html), Some("<h1>T</h1><p>body</p>"));
        assert_eq!(docs[0].content(), Some("# T\nbody"));
        assert_eq!(docs[0].record_metadata()["id"], 1);
        assert!(!docs[0].extra.contains_key("text_html"));
    }
}
