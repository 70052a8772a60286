//! Chat backend for any server speaking the OpenAI chat completions API
//! (OpenAI itself, vLLM, LocalAI, llama.cpp server).
//!
//! Categorization is a single user message at low temperature; the reply text
//! is returned untouched and parsed by the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http;

use super::Categorizer;

/// Sampling temperature for categorization; low so answers stay repeatable
const TEMPERATURE: f32 = 0.1;

#[derive(Clone)]
pub struct OpenAICompatibleBackend {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAICompatibleBackend {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http_client: http::client(timeout)?,
            base_url: http::trim_base_url(base_url),
            model: model.to_string(),
            api_key: None,
        })
    }

    /// Backend that sends `Authorization: Bearer <api_key>`
    pub fn with_api_key(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api_key: Some(api_key.to_string()),
            ..Self::new(base_url, model, timeout)?
        })
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [PromptMessage<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct PromptMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Reply,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    content: Option<String>,
}

impl Completion {
    /// Text of the first choice; a missing or blank reply is an upstream fault
    fn into_text(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| Error::upstream("chat completion returned no content"))
    }
}

#[async_trait]
impl Categorizer for OpenAICompatibleBackend {
    async fn create_chat_completion(&self, prompt: &str) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [PromptMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
            stream: false,
        };

        let mut request = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "Requesting categorization");

        let response = http::check_status(request.send().await?, "chat completion").await?;
        let completion: Completion = response.json().await?;
        completion.into_text()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
