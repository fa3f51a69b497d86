//! OpenAI-compatible embedding client.
//!
//! Blocking by design: the evaluation pipeline is synchronous, so this client
//! must not be called from inside a tokio runtime.

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Request body for `/v1/embeddings`.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Embedding client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/embeddings", base)
    }

    fn request(&self, input: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.config.model,
            input,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send()?;
        let status = response.status();
        let text = response.text()?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&text) {
                return Err(RagError::Embedding(format!(
                    "API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(RagError::Embedding(format!(
                "Request failed ({}): {}",
                status, text
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&text)?;
        let embeddings = order_embeddings(parsed.data, input.len())?;
        debug!(count = embeddings.len(), model = %self.config.model, "embedded texts");
        Ok(embeddings)
    }
}

/// Sort response items by `index` and check one vector came back per input.
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(RagError::Embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl Embedder for HttpEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("no embedding returned".to_string()))
    }

    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_construction() {
        let embedder = HttpEmbedder::new(EmbeddingConfig {
            api_base: "http://localhost:11434/".to_string(),
            ..Default::default()
        });
        assert_eq!(embedder.endpoint(), "http://localhost:11434/v1/embeddings");
    }

    #[test]
    fn test_order_embeddings_by_index() {
        let body = r#"{"data": [
            {"embedding": [0.0, 1.0], "index": 1},
            {"embedding": [1.0, 0.0], "index": 0}
        ]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        let ordered = order_embeddings(parsed.data, 2).unwrap();
        assert_eq!(ordered, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_order_embeddings_count_mismatch() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"embedding": [1.0]}]}"#).unwrap();
        assert!(order_embeddings(parsed.data, 2).is_err());
    }

    #[test]
    fn test_empty_batch_skips_request() {
        let embedder = HttpEmbedder::new(EmbeddingConfig::default());
        assert!(embedder.embed_documents(&[]).unwrap().is_empty());
    }
}
