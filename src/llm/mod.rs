//! LLM integration module.
//!
//! Provides an OpenAI-compatible client, the prompts used for question
//! generation and answering, and JSON extraction from model replies.

mod client;
pub mod json;
mod prompts;

pub use client::{LlmClient, LlmResponse, Message, Role, TokenUsage};
pub use prompts::Prompts;

use crate::error::Result;

/// A text-completion model.
#[allow(async_fn_in_trait)]
pub trait LanguageModel {
    /// Send a single user prompt and return the reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
