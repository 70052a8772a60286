//! Mock backend for testing
//!
//! Answers categorization prompts without a model server: the payee list is
//! read back out of the prompt and matched against a few well-known
//! merchants. Every prompt received is recorded so tests can assert how many
//! calls were made.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::parsing::extract_json;
use super::Categorizer;

#[derive(Clone, Default)]
enum Reply {
    /// Classify the names found in the prompt
    #[default]
    Keywords,
    /// Always answer with this text
    Fixed(String),
    /// Always fail
    Fail(String),
}

/// Mock categorizer for testing
#[derive(Clone, Default)]
pub struct MockBackend {
    reply: Reply,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    /// Create a mock that classifies well-known merchants
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always returns `response`
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            reply: Reply::Fixed(response.into()),
            ..Self::default()
        }
    }

    /// Create a mock whose every call fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Reply::Fail(message.into()),
            ..Self::default()
        }
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

/// Category for a few merchants, by keyword
pub fn classify_name(name: &str) -> Option<&'static str> {
    let n = name.to_lowercase();
    let category = match n.as_str() {
        m if m.contains("uber") || m.contains("99app") => "Transport",
        m if m.contains("ifood") || m.contains("padaria") || m.contains("restaurante") => "Food",
        m if m.contains("netflix") || m.contains("spotify") => "Subscriptions",
        m if m.contains("mercado") || m.contains("supermercado") => "Groceries",
        m if m.contains("drogaria") || m.contains("farmacia") => "Health",
        _ => return None,
    };
    Some(category)
}

/// Names list embedded in a categorization prompt (the last JSON array)
fn names_in_prompt(prompt: &str) -> Vec<String> {
    extract_json(prompt)
        .into_iter()
        .rev()
        .find_map(|candidate| serde_json::from_str::<Vec<String>>(candidate).ok())
        .unwrap_or_default()
}

#[async_trait]
impl Categorizer for MockBackend {
    async fn create_chat_completion(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        match &self.reply {
            Reply::Fixed(response) => Ok(response.clone()),
            Reply::Fail(message) => Err(Error::upstream(message.clone())),
            Reply::Keywords => {
                let mapping: BTreeMap<String, &str> = names_in_prompt(prompt)
                    .into_iter()
                    .filter_map(|name| classify_name(&name).map(|c| (name, c)))
                    .collect();
                let json = serde_json::to_string_pretty(&mapping)?;
                Ok(format!("Here are the categories:\n```json\n{}\n```", json))
            }
        }
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
