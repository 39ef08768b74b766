//! Cross-encoder reranking of retrieval candidates. `HttpReranker` issues
//! a bearer-authed JSON POST the same way the teacher's
//! `openai.rs::completion` talks to a chat-completions endpoint, just
//! against a rerank endpoint instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return indices into `candidates`, most relevant first.
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<usize>>;
}

pub struct HttpReranker {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpReranker {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self { client: reqwest::Client::new(), api_key, base_url, model }
    }
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    #[allow(dead_code)]
    relevance_score: f32,
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<usize>> {
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let payload = json!({
            "model": self.model,
            "query": query,
            "documents": candidates,
            "top_k": candidates.len(),
        });

        let response: RerankResponse = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .context("sending rerank request")?
            .json()
            .await
            .context("parsing rerank response")?;

        Ok(response.results.into_iter().map(|r| r.index).collect())
    }
}

/// Used when `RERANK_ENABLED` is false, or in tests: passes candidates
/// through in their original order.
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<usize>> {
        Ok((0..candidates.len()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reranker_preserves_order() {
        let reranker = NoopReranker;
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let order = reranker.rerank("query", &candidates).await.unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn noop_reranker_handles_empty() {
        let reranker = NoopReranker;
        let order = reranker.rerank("query", &[]).await.unwrap();
        assert!(order.is_empty());
    }
}
