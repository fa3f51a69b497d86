//! Pulling JSON out of free-form model replies.

use crate::error::{RagError, Result};
use serde::de::DeserializeOwned;

/// Locate the JSON object in a model reply.
///
/// Handles replies wrapped in Markdown code fences and replies with prose
/// around the object. Returns `None` when there is no `{ ... }` span.
pub fn extract_json(response: &str) -> Option<&str> {
    let mut text = response.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string ("json") up to the first newline
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        text = body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body).trim();
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extract and deserialize the JSON object in a model reply.
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T> {
    let json = extract_json(response)
        .ok_or_else(|| RagError::LlmParse(format!("no JSON object in response: {}", response)))?;
    serde_json::from_str(json).map_err(|e| RagError::LlmParse(format!("{}: {}", e, json)))
}
