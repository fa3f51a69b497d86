//! Building vector databases from a dataset.
//!
//! An [`IndexPlan`] names a database and the splitter that fills it. A single
//! plan reads whichever rendition suits its splitter; [`auto_plans`] instead
//! builds one forward database per rendition present in the dataset plus one
//! split database per rendition.

use crate::document::{SourceDocument, TextFormat};
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::splitter::{Chunk, SplitterKind};
use crate::store::LocalVectorStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One database to build.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPlan {
    pub name: String,
    /// Rendition to read. `None` lets the splitter choose, falling back to
    /// whatever text the document has.
    pub format: Option<TextFormat>,
    pub splitter: SplitterKind,
}

impl IndexPlan {
    pub fn new(name: impl Into<String>, splitter: SplitterKind) -> Self {
        Self {
            name: name.into(),
            format: None,
            splitter,
        }
    }

    /// Chunks for every document that has text for this plan.
    ///
    /// Plans pinned to a rendition copy all record fields into the chunk
    /// metadata.
    pub fn chunks(&self, documents: &[SourceDocument]) -> Vec<Chunk> {
        match self.format {
            None => documents
                .iter()
                .flat_map(|d| self.splitter.split_document(d))
                .collect(),
            Some(format) => documents
                .iter()
                .filter_map(|d| {
                    d.text_for(format)
                        .map(|text| self.splitter.split_with_metadata(text, &d.record_metadata()))
                })
                .flatten()
                .collect(),
        }
    }
}

/// Splitter used for the split database of each rendition.
fn auto_splitter(format: TextFormat, chunk_size: usize, chunk_overlap: usize) -> (&'static str, SplitterKind) {
    match format {
        TextFormat::Plain => (
            "sentence",
            SplitterKind::Sentence {
                chunk_size,
                chunk_overlap,
            },
        ),
        TextFormat::Html => (
            "html",
            SplitterKind::Html {
                chunk_size,
                chunk_overlap,
            },
        ),
        TextFormat::Markdown => (
            "md",
            SplitterKind::Markdown {
                chunk_size,
                chunk_overlap,
            },
        ),
    }
}

/// Plans for every rendition present in `documents`.
///
/// Forward databases are named `<base>__forward`, with `__html` or `__md`
/// appended for the rich renditions. Split databases are named
/// `<base>__sentence`, `<base>__html` and `<base>__md`.
pub fn auto_plans(
    base: &str,
    documents: &[SourceDocument],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<IndexPlan> {
    let mut plans = Vec::new();

    for format in TextFormat::ALL {
        if !documents.iter().any(|d| d.text_for(format).is_some()) {
            continue;
        }

        let forward_name = match format {
            TextFormat::Plain => format!("{}__forward", base),
            other => format!("{}__forward__{}", base, other.suffix()),
        };
        plans.push(IndexPlan {
            name: forward_name,
            format: Some(format),
            splitter: SplitterKind::Forward,
        });

        let (label, splitter) = auto_splitter(format, chunk_size, chunk_overlap);
        plans.push(IndexPlan {
            name: format!("{}__{}", base, label),
            format: Some(format),
            splitter,
        });
    }

    plans
}

/// Summary of a database written by [`build_index`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltIndex {
    pub name: String,
    pub entries: usize,
    pub dimension: Option<usize>,
    pub path: PathBuf,
}

/// Split, embed and save the database described by `plan` under
/// `databases_dir/<plan.name>`.
///
/// An existing index is an error unless `force` is set, in which case it is
/// replaced.
pub fn build_index(
    databases_dir: &Path,
    plan: &IndexPlan,
    documents: &[SourceDocument],
    embedder: Arc<dyn Embedder>,
    force: bool,
) -> Result<BuiltIndex> {
    plan.splitter.validate()?;

    let chunks = plan.chunks(documents);
    if chunks.is_empty() {
        return Err(RagError::InvalidConfig(format!(
            "database '{}' would have no chunks",
            plan.name
        )));
    }
    info!(
        database = %plan.name,
        documents = documents.len(),
        chunks = chunks.len(),
        splitter = ?plan.splitter,
        "split dataset"
    );

    let mut store = LocalVectorStore::open(&databases_dir.join(&plan.name), embedder);
    if force {
        match store.delete() {
            Ok(()) | Err(RagError::IndexNotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let index = store.create(&chunks)?;
    Ok(BuiltIndex {
        name: plan.name.clone(),
        entries: index.len(),
        dimension: index.dimension(),
        path: store.index_path(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorStore;
    use serde_json::Value;
    use tempfile::TempDir;

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

    fn rich_document() -> SourceDocument {
        let mut doc = SourceDocument::new("abc plain");
        doc.text = None;
        doc.text_markdown = Some("# Title\nbody aaa".to_string());
        doc.text_html = Some("<h1>Title</h1><p>body bbb</p>".to_string());
        doc.extra.insert("id".to_string(), Value::from(1));
        doc
    }

    #[test]
    fn test_auto_plans_cover_present_renditions() {
        let plans = auto_plans("docs", &[rich_document()], 100, 10);
        let names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();

        assert_eq!(
            names,
            vec!["docs__forward__html", "docs__html", "docs__forward__md", "docs__md"]
        );
        assert_eq!(plans[0].format, Some(TextFormat::Html));
        assert_eq!(plans[0].splitter, SplitterKind::Forward);
        assert_eq!(
            plans[3].splitter,
            SplitterKind::Markdown {
                chunk_size: 100,
                chunk_overlap: 10
            }
        );

        let plain = auto_plans("docs", &[SourceDocument::new("text")], 100, 10);
        let names: Vec<&str> = plain.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["docs__forward", "docs__sentence"]);
    }

    #[test]
    fn test_pinned_plan_reads_its_rendition() {
        let documents = vec![rich_document(), SourceDocument::new("plain only")];
        let plans = auto_plans("docs", &documents, 100, 10);

        let html = plans.iter().find(|p| p.name == "docs__html").unwrap();
        let chunks = html.chunks(&documents);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "body bbb");
        assert_eq!(chunks[0].metadata["Header 1"], "Title");
        assert_eq!(chunks[0].metadata["id"], 1);

        let forward = plans.iter().find(|p| p.name == "docs__forward").unwrap();
        let chunks = forward.chunks(&documents);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "plain only");
    }

    #[test]
    fn test_build_index_writes_searchable_database() {
        let dir = TempDir::new().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(LetterEmbedder);
        let documents = vec![rich_document()];

        for plan in auto_plans("docs", &documents, 100, 10) {
            let built = build_index(dir.path(), &plan, &documents, Arc::clone(&embedder), false).unwrap();
            assert_eq!(built.entries, 1);
            assert_eq!(built.dimension, Some(3));
            assert!(built.path.is_file());
        }

        let store = LocalVectorStore::open(&dir.path().join("docs__md"), Arc::clone(&embedder));
        let results = store.search("aaa", 1).unwrap();
        assert_eq!(results[0].content, "body aaa");
    }

    #[test]
    fn test_build_index_existing_requires_force() {
        let dir = TempDir::new().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(LetterEmbedder);
        let documents = vec![SourceDocument::new("abc")];
        let plan = IndexPlan::new("docs", SplitterKind::Forward);

        build_index(dir.path(), &plan, &documents, Arc::clone(&embedder), false).unwrap();
        let again = build_index(dir.path(), &plan, &documents, Arc::clone(&embedder), false);
        assert!(matches!(again, Err(RagError::IndexExists(_))));

        // A first build with force has nothing to replace
        let fresh = IndexPlan::new("fresh", SplitterKind::Forward);
        assert!(build_index(dir.path(), &fresh, &documents, Arc::clone(&embedder), true).is_ok());
        assert!(build_index(dir.path(), &plan, &documents, embedder, true).is_ok());
    }

    #[test]
    fn test_build_index_rejects_bad_window_and_empty_output() {
        let dir = TempDir::new().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(LetterEmbedder);
        let documents = vec![SourceDocument::new("abc")];

        let bad = IndexPlan::new(
            "bad",
            SplitterKind::Sentence {
                chunk_size: 10,
                chunk_overlap: 20,
            },
        );
        assert!(matches!(
            build_index(dir.path(), &bad, &documents, Arc::clone(&embedder), false),
            Err(RagError::InvalidConfig(_))
        ));

        let mut html_only = IndexPlan::new("html", SplitterKind::Forward);
        html_only.format = Some(TextFormat::Html);
        assert!(build_index(dir.path(), &html_only, &documents, embedder, false).is_err());
        assert!(!dir.path().join("bad").exists());
    }
}
