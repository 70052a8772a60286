//! Categorizer abstraction
//!
//! The sync pipeline needs exactly one thing from a language model: a single
//! prompt in, free-form text out. Parsing the answer is the caller's job (see
//! [`parsing`]).
//!
//! `AIClient` wraps the backends (`OpenAICompatibleBackend`, `MockBackend`)
//! in an enum so the orchestrator can hold one cloneable value. The `[ai]`
//! config section picks host, model and key; `OPENAI_COMPATIBLE_HOST`,
//! `OPENAI_COMPATIBLE_MODEL` and `OPENAI_COMPATIBLE_API_KEY` override it.

mod mock;
mod openai_compatible;
pub mod parsing;

pub use mock::MockBackend;
pub use openai_compatible::OpenAICompatibleBackend;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::AiConfig;
use crate::error::Result;

/// Single-shot text completion used for spend classification.
///
/// No streaming, no conversation state and no retries.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn create_chat_completion(&self, prompt: &str) -> Result<String>;

    /// Model name, logged with each categorization
    fn model(&self) -> &str;

    /// Backend base URL, logged with each categorization
    fn host(&self) -> &str;
}

#[derive(Clone)]
pub enum AIClient {
    OpenAICompatible(OpenAICompatibleBackend),
    /// Keyword-matching stand-in used by tests and dry runs
    Mock(MockBackend),
}

impl AIClient {
    /// Backend for the `[ai]` section; an API key switches on bearer auth
    pub fn from_config(config: &AiConfig, timeout: Duration) -> Result<Self> {
        let backend = match config.api_key.as_deref() {
            Some(key) => {
                OpenAICompatibleBackend::with_api_key(&config.host, &config.model, key, timeout)?
            }
            None => OpenAICompatibleBackend::new(&config.host, &config.model, timeout)?,
        };
        Ok(AIClient::OpenAICompatible(backend))
    }

    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }
}

#[async_trait]
impl Categorizer for AIClient {
    async fn create_chat_completion(&self, prompt: &str) -> Result<String> {
        match self {
            AIClient::OpenAICompatible(b) => b.create_chat_completion(prompt).await,
            AIClient::Mock(b) => b.create_chat_completion(prompt).await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AIClient::OpenAICompatible(b) => b.model(),
            AIClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AIClient::OpenAICompatible(b) => b.host(),
            AIClient::Mock(b) => b.host(),
        }
    }
}
