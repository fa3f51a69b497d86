//! Text splitters used when building vector indexes.

use crate::document::{Metadata, SourceDocument, TextFormat};
use crate::error::{RagError, Result};
use serde_json::Value;

/// A chunk of text with the metadata it will be indexed under.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

/// Splitting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterKind {
    /// Index each document whole.
    Forward,
    /// Consecutive windows of `chunk_size` characters.
    Fixed { chunk_size: usize },
    /// Overlapping windows that prefer to end on a sentence boundary.
    Sentence {
        chunk_size: usize,
        chunk_overlap: usize,
    },
    /// Split on markdown headers (`#` to `####`), then by sentence.
    Markdown {
        chunk_size: usize,
        chunk_overlap: usize,
    },
    /// Split on HTML headings (`<h1>` to `<h4>`), strip tags, then by sentence.
    Html {
        chunk_size: usize,
        chunk_overlap: usize,
    },
}

impl Default for SplitterKind {
    fn default() -> Self {
        SplitterKind::Sentence {
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }
}

impl SplitterKind {
    /// Reject window settings that cannot make progress.
    pub fn validate(&self) -> Result<()> {
        match *self {
            SplitterKind::Forward => Ok(()),
            SplitterKind::Fixed { chunk_size } => {
                if chunk_size == 0 {
                    return Err(RagError::InvalidConfig(
                        "chunk_size must be greater than 0".to_string(),
                    ));
                }
                Ok(())
            }
            SplitterKind::Sentence {
                chunk_size,
                chunk_overlap,
            }
            | SplitterKind::Markdown {
                chunk_size,
                chunk_overlap,
            }
            | SplitterKind::Html {
                chunk_size,
                chunk_overlap,
            } => {
                if chunk_size == 0 {
                    return Err(RagError::InvalidConfig(
                        "chunk_size must be greater than 0".to_string(),
                    ));
                }
                if chunk_overlap >= chunk_size {
                    return Err(RagError::InvalidConfig(format!(
                        "chunk_overlap ({}) must be smaller than chunk_size ({})",
                        chunk_overlap, chunk_size
                    )));
                }
                Ok(())
            }
        }
    }

    /// The document rendition this splitter reads by preference.
    pub fn source_format(&self) -> TextFormat {
        match self {
            SplitterKind::Html { .. } => TextFormat::Html,
            SplitterKind::Markdown { .. } => TextFormat::Markdown,
            _ => TextFormat::Plain,
        }
    }

    /// Split a document into chunks, each carrying the document metadata.
    ///
    /// Reads the rendition matching [`SplitterKind::source_format`], falling
    /// back to the first one the document has.
    pub fn split_document(&self, document: &SourceDocument) -> Vec<Chunk> {
        match document
            .text_for(self.source_format())
            .or_else(|| document.content())
        {
            Some(text) => self.split_with_metadata(text, &document.metadata),
            None => Vec::new(),
        }
    }

    /// Split `text` into chunks carrying `metadata`. Header-aware splitters
    /// add a `Header N` entry per enclosing heading.
    pub fn split_with_metadata(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        let sections = match *self {
            SplitterKind::Markdown {
                chunk_size,
                chunk_overlap,
            } => split_markdown(text, chunk_size, chunk_overlap),
            SplitterKind::Html {
                chunk_size,
                chunk_overlap,
            } => split_html(text, chunk_size, chunk_overlap),
            _ => {
                return self
                    .split_text(text)
                    .into_iter()
                    .map(|text| Chunk {
                        text,
                        metadata: metadata.clone(),
                    })
                    .collect();
            }
        };

        sections
            .into_iter()
            .map(|(headers, text)| {
                let mut metadata = metadata.clone();
                for (level, title) in headers {
                    metadata.insert(format!("Header {}", level), Value::String(title));
                }
                Chunk { text, metadata }
            })
            .collect()
    }

    /// Split raw text. Headers are not recorded here.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        match *self {
            SplitterKind::Forward => {
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![text.to_string()]
                }
            }
            SplitterKind::Fixed { chunk_size } => split_fixed(text, chunk_size),
            SplitterKind::Sentence {
                chunk_size,
                chunk_overlap,
            } => split_sentences(text, chunk_size, chunk_overlap),
            SplitterKind::Markdown {
                chunk_size,
                chunk_overlap,
            } => split_markdown(text, chunk_size, chunk_overlap)
                .into_iter()
                .map(|(_, text)| text)
                .collect(),
            SplitterKind::Html {
                chunk_size,
                chunk_overlap,
            } => split_html(text, chunk_size, chunk_overlap)
                .into_iter()
                .map(|(_, text)| text)
                .collect(),
        }
    }
}

fn split_fixed(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|c| c.iter().collect::<String>())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// Chunk text into overlapping segments.
fn split_sentences(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let text_len = chars.len();
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = if chunk_overlap >= chunk_size {
        0
    } else {
        chunk_overlap
    };

    if text_len == 0 {
        return chunks;
    }

    let mut start = 0;

    while start < text_len {
        let end = (start + chunk_size).min(text_len);

        // Prefer a sentence ending within the last 100 chars of the window
        let adjusted_end = if end < text_len {
            let search_start = end.saturating_sub(100).max(start);
            chars[search_start..end]
                .iter()
                .rposition(|c| matches!(c, '.' | '!' | '?'))
                .map(|pos| search_start + pos + 1)
                .filter(|&candidate| candidate > start)
                .unwrap_or(end)
        } else {
            end
        };

        let final_end = adjusted_end.max(start + 1).min(text_len);
        let piece: String = chars[start..final_end].iter().collect();

        if !piece.trim().is_empty() {
            chunks.push(piece.trim().to_string());
        }

        if final_end >= text_len {
            break;
        }

        let next_start = if chunk_overlap > 0 && final_end > chunk_overlap {
            final_end - chunk_overlap
        } else {
            final_end
        };

        // Drop the overlap when it would not move past the current start
        start = if next_start <= start {
            final_end
        } else {
            next_start
        };
    }

    chunks
}

/// Header level and title of a markdown heading line, for `#` to `####`.
fn markdown_header(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=4).contains(&level) {
        return None;
    }

    let rest = &trimmed[level..];
    if !rest.starts_with(' ') {
        return None;
    }

    Some((level, rest.trim().to_string()))
}

type HeaderPath = Vec<(usize, String)>;

fn push_section(headers: &HeaderPath, body: &mut String, sections: &mut Vec<(HeaderPath, String)>) {
    if !body.trim().is_empty() {
        sections.push((headers.clone(), std::mem::take(body)));
    } else {
        body.clear();
    }
}

/// Sub-split each section by sentence, keeping its header path.
fn chunk_sections(
    sections: Vec<(HeaderPath, String)>,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<(HeaderPath, String)> {
    sections
        .into_iter()
        .flat_map(|(headers, body)| {
            split_sentences(&body, chunk_size, chunk_overlap)
                .into_iter()
                .map(move |chunk| (headers.clone(), chunk))
        })
        .collect()
}

fn split_markdown(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<(HeaderPath, String)> {
    let mut sections: Vec<(HeaderPath, String)> = Vec::new();
    let mut headers: HeaderPath = Vec::new();
    let mut body = String::new();

    for line in text.lines() {
        if let Some((level, title)) = markdown_header(line) {
            push_section(&headers, &mut body, &mut sections);
            headers.retain(|(l, _)| *l < level);
            headers.push((level, title));
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    push_section(&headers, &mut body, &mut sections);

    chunk_sections(sections, chunk_size, chunk_overlap)
}

/// Heading level of an `h1` to `h4` tag name, opening or closing.
fn html_heading_level(tag: &str) -> Option<usize> {
    match tag.trim_start_matches('/') {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        _ => None,
    }
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag.trim_start_matches('/'),
        "p" | "br"
            | "div"
            | "li"
            | "tr"
            | "h5"
            | "h6"
            | "ul"
            | "ol"
            | "pre"
            | "table"
            | "section"
            | "article"
            | "blockquote"
    )
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Decode entities, trim every line and drop blank ones.
fn clean_html_text(text: &str) -> String {
    decode_entities(text)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_html(html: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<(HeaderPath, String)> {
    let mut sections: Vec<(HeaderPath, String)> = Vec::new();
    let mut headers: HeaderPath = Vec::new();
    let mut body = String::new();
    let mut heading: Option<(usize, String)> = None;

    let mut in_tag = false;
    let mut building_tag = false;
    let mut tag_name = String::new();
    let mut skipping = false;

    for ch in html.chars() {
        if ch == '<' {
            in_tag = true;
            building_tag = true;
            tag_name.clear();
            continue;
        }
        if ch == '>' && in_tag {
            in_tag = false;
            building_tag = false;

            let tag = tag_name.to_lowercase();
            match tag.as_str() {
                "script" | "style" => skipping = true,
                "/script" | "/style" => skipping = false,
                _ => {}
            }

            if let Some(level) = html_heading_level(&tag) {
                if tag.starts_with('/') {
                    if let Some((open, title)) = heading.take() {
                        let title = clean_html_text(&title).replace('\n', " ");
                        headers.retain(|(l, _)| *l < open);
                        if !title.is_empty() {
                            headers.push((open, title));
                        }
                    }
                } else {
                    push_section(&headers, &mut body, &mut sections);
                    heading = Some((level, String::new()));
                }
            } else if is_block_tag(&tag) {
                match heading.as_mut() {
                    Some((_, title)) => title.push(' '),
                    None => body.push('\n'),
                }
            }
            continue;
        }
        if in_tag {
            if building_tag && (ch.is_alphanumeric() || ch == '/') {
                tag_name.push(ch);
            } else {
                building_tag = false;
            }
            continue;
        }
        if skipping {
            continue;
        }
        match heading.as_mut() {
            Some((_, title)) => title.push(ch),
            None => body.push(ch),
        }
    }
    push_section(&headers, &mut body, &mut sections);

    let sections = sections
        .into_iter()
        .map(|(headers, body)| (headers, clean_html_text(&body)))
        .collect();
    chunk_sections(sections, chunk_size, chunk_overlap)
}
