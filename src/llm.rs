//! The extraction LLM boundary. `OpenAiCompatExtractor` POSTs chat
//! messages the same way the teacher's `openai.rs::completion` does,
//! against a configurable OpenAI-compatible base URL (Fireworks by
//! default) rather than hardcoding OpenAI's endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Serialize)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Send a chat-style prompt and return the raw text response.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

pub struct OpenAiCompatExtractor {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatExtractor {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self { client: reqwest::Client::new(), api_key, base_url, model }
    }
}

#[async_trait]
impl Extractor for OpenAiCompatExtractor {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
        });

        let response: Value = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .context("sending extraction request")?
            .json()
            .await
            .context("parsing extraction response")?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .context("extraction response missing choices[0].message.content")
    }
}

/// A scripted extractor for tests: returns a fixed response regardless of
/// input, or replays a queue of canned responses in order.
pub struct StubExtractor {
    responses: std::sync::Mutex<Vec<String>>,
}

impl StubExtractor {
    pub fn new(responses: Vec<String>) -> Self {
        Self { responses: std::sync::Mutex::new(responses) }
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn complete(&self, _messages: &[Message]) -> Result<String> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok("[]".to_string());
        }
        Ok(responses.remove(0))
    }
}
