//! Persistence layer for vector index artifacts and output files.
//!
//! Indexes are saved either as JSON (human-readable) or bincode (compact
//! binary). Chunk metadata is stored as an embedded JSON string so both
//! formats can carry arbitrary values.

use crate::error::{RagError, Result};
use crate::store::{FlatIndex, IndexEntry};
use bincode::{Decode, Encode};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default filename of a saved index inside a database directory.
pub const DEFAULT_INDEX_FILENAME: &str = "index.bin";

/// Filenames recognised as index artifacts, in lookup order.
pub const INDEX_ARTIFACTS: [&str; 2] = ["index.bin", "index.json"];

/// Save format for index artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    Json,
    /// Bincode format (binary, compact).
    Bincode,
}

impl SaveFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => SaveFormat::Json,
            Some("bin") | Some("bincode") => SaveFormat::Bincode,
            _ => SaveFormat::Json,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Encode, Decode)]
struct StoredEntry {
    content: String,
    metadata_json: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize, Encode, Decode)]
struct StoredIndex {
    dimension: u32,
    entries: Vec<StoredEntry>,
}

/// Find the index artifact inside a database directory, if any.
pub fn find_index_artifact(db_dir: &Path) -> Option<PathBuf> {
    INDEX_ARTIFACTS
        .iter()
        .map(|name| db_dir.join(name))
        .find(|path| path.is_file())
}

/// Save a FlatIndex to a file.
pub fn save_index(index: &FlatIndex, path: &Path) -> Result<()> {
    let format = SaveFormat::from_path(path);
    save_index_with_format(index, path, format)
}

/// Save a FlatIndex with specific format.
pub fn save_index_with_format(index: &FlatIndex, path: &Path, format: SaveFormat) -> Result<()> {
    ensure_parent_dir(path)?;

    let stored = StoredIndex {
        dimension: index.dimension().unwrap_or(0) as u32,
        entries: index
            .entries()
            .iter()
            .map(|e| {
                Ok(StoredEntry {
                    content: e.content.clone(),
                    metadata_json: serde_json::to_string(&e.metadata)?,
                    embedding: e.embedding.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
    };

    let data = match format {
        SaveFormat::Json => serde_json::to_string_pretty(&stored)
            .map_err(|e| RagError::Serialization(e.to_string()))?
            .into_bytes(),
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            bincode::encode_to_vec(&stored, config)
                .map_err(|e| RagError::Serialization(e.to_string()))?
        }
    };

    fs::write(path, &data).map_err(|e| RagError::io(path, e))?;

    Ok(())
}

/// Load a FlatIndex from a file.
pub fn load_index(path: &Path) -> Result<FlatIndex> {
    if !path.exists() {
        return Err(RagError::IndexNotFound(path.to_path_buf()));
    }

    let format = SaveFormat::from_path(path);
    load_index_with_format(path, format)
}

/// Load a FlatIndex with specific format.
pub fn load_index_with_format(path: &Path, format: SaveFormat) -> Result<FlatIndex> {
    let data = fs::read(path).map_err(|e| RagError::io(path, e))?;

    let stored: StoredIndex = match format {
        SaveFormat::Json => serde_json::from_slice(&data)
            .map_err(|e| RagError::Serialization(e.to_string()))?,
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            let (stored, _): (StoredIndex, usize) = bincode::decode_from_slice(&data, config)
                .map_err(|e| RagError::Serialization(e.to_string()))?;
            stored
        }
    };

    let entries = stored
        .entries
        .into_iter()
        .map(|e| {
            Ok(IndexEntry {
                content: e.content,
                metadata: serde_json::from_str(&e.metadata_json)?,
                embedding: e.embedding,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    FlatIndex::from_entries(entries)
}

/// Copy an existing file aside as `<stem>.<timestamp>.bak`.
///
/// Returns the backup path, or `None` when there was nothing to back up.
pub fn backup_file(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let backup_path =
        path.with_extension(format!("{}.bak", Local::now().format("%Y%m%d_%H%M%S")));
    fs::copy(path, &backup_path).map_err(|e| RagError::io(&backup_path, e))?;

    Ok(Some(backup_path))
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| RagError::io(parent, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use tempfile::TempDir;

    fn create_test_index() -> FlatIndex {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), Value::from("doc-1"));
        metadata.insert("page".to_string(), Value::from(3));

        FlatIndex::from_entries(vec![
            IndexEntry {
                content: "Rust has no garbage collector.".to_string(),
                metadata,
                embedding: vec![1.0, 0.0, 0.0],
            },
            IndexEntry {
                content: "Python was released in 1991.".to_string(),
                metadata: Map::new(),
                embedding: vec![0.0, 1.0, 0.0],
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_save_and_load_bincode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join(DEFAULT_INDEX_FILENAME);

        let original = create_test_index();
        save_index(&original, &path).unwrap();

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dimension(), Some(3));
        assert_eq!(loaded.entries()[0].metadata["page"], 3);
        assert_eq!(loaded.entries()[1].content, "Python was released in 1991.");
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        save_index(&create_test_index(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("garbage collector"));

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.entries()[0].metadata["source"], "doc-1");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            SaveFormat::from_path(Path::new("index.json")),
            SaveFormat::Json
        );
        assert_eq!(
            SaveFormat::from_path(Path::new("index.bin")),
            SaveFormat::Bincode
        );
        assert_eq!(
            SaveFormat::from_path(Path::new("index.bincode")),
            SaveFormat::Bincode
        );
        assert_eq!(SaveFormat::from_path(Path::new("index")), SaveFormat::Json);
    }

    #[test]
    fn test_load_nonexistent() {
        let result = load_index(Path::new("/nonexistent/index.bin"));
        assert!(matches!(result, Err(RagError::IndexNotFound(_))));
    }

    #[test]
    fn test_find_index_artifact() {
        let dir = TempDir::new().unwrap();
        assert!(find_index_artifact(dir.path()).is_none());

        fs::write(dir.path().join("index.json"), "{}").unwrap();
        assert_eq!(
            find_index_artifact(dir.path()),
            Some(dir.path().join("index.json"))
        );
    }

    #[test]
    fn test_backup_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("questions.json");

        assert!(backup_file(&path).unwrap().is_none());

        fs::write(&path, "{\"question\": \"q\"}\n").unwrap();
        let backup = backup_file(&path).unwrap().unwrap();

        assert!(backup.exists());
        assert!(backup.to_string_lossy().ends_with(".bak"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), fs::read_to_string(&path).unwrap());
    }
}
