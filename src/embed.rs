//! Text embedding. `FastEmbedEmbedder` wraps `fastembed::TextEmbedding` the
//! same way the teacher's `indexing.rs`/`search.rs` do; `StubEmbedder`
//! produces deterministic hash-based vectors so tests never need a model
//! download.

use std::hash::{DefaultHasher, Hash, Hasher};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

/// Which side of a query/document pair a text is, in case an embedder
/// needs asymmetric prefixes (most BGE-family models do for queries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Document,
    Query,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Vec<f32>>>;
    fn dim(&self) -> usize;
}

pub struct FastEmbedEmbedder {
    model: TextEmbedding,
    dim: usize,
}

impl FastEmbedEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::BGESmallENV15).with_show_download_progress(false),
        )
        .context("initializing fastembed model")?;
        Ok(Self { model, dim })
    }
}

#[async_trait]
impl Embedder for FastEmbedEmbedder {
    async fn embed(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Vec<f32>>> {
        let prefixed: Vec<String> = match kind {
            EmbedKind::Query => texts.iter().map(|t| format!("query: {t}")).collect(),
            EmbedKind::Document => texts.to_vec(),
        };

        let vectors = self
            .model
            .embed(prefixed, None)
            .context("running fastembed inference")?;
        Ok(vectors.into_iter().map(normalize).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Deterministic pseudo-embedding for tests: hashes overlapping trigrams
/// of the input into a fixed-width vector, then L2-normalizes. Texts that
/// share vocabulary land closer together under cosine similarity, which is
/// enough to exercise retrieval ranking logic without a real model.
pub struct StubEmbedder {
    dim: usize,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[String], _kind: EmbedKind) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dim)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut vec = vec![0f32; dim];
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        vec[0] = 1.0;
        return vec;
    }

    for word in &words {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        let h = hasher.finish();
        let idx = (h as usize) % dim;
        vec[idx] += 1.0;
    }

    normalize(vec)
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_embedder_is_deterministic_and_unit_length() {
        let embedder = StubEmbedder::new(64);
        let a = embedder
            .embed(&["rust ownership rules".to_string()], EmbedKind::Document)
            .await
            .unwrap();
        let b = embedder
            .embed(&["rust ownership rules".to_string()], EmbedKind::Document)
            .await
            .unwrap();
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_unrelated() {
        let embedder = StubEmbedder::new(64);
        let a = embedder
            .embed(&["rust borrow checker ownership".to_string()], EmbedKind::Document)
            .await
            .unwrap();
        let b = embedder
            .embed(&["rust ownership and borrowing".to_string()], EmbedKind::Document)
            .await
            .unwrap();
        let c = embedder
            .embed(&["weekend hiking trip photos".to_string()], EmbedKind::Document)
            .await
            .unwrap();

        let cos = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(cos(&a[0], &b[0]) > cos(&a[0], &c[0]));
    }
}
