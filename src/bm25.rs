//! Hand-rolled BM25 keyword index, persisted as a flat JSON array of
//! per-note term-frequency records. This is deliberately not a
//! general-purpose full-text engine (no segments, no on-disk inverted
//! index) — the vault is small and the persisted shape is dictated by
//! what `build`/`score` need, matching the original's `vault_retrieve.py`
//! tokenizer and Okapi BM25 scorer (k1=1.5, b=0.75).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

use crate::models::Bm25Doc;

const K1: f32 = 1.5;
const B: f32 = 0.75;

const STOPWORDS: &[&str] = &[
    // English
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "this", "that", "these",
    "those", "to", "of", "in", "on", "at", "for", "with", "and", "or", "but", "it", "as", "by",
    "from", "up", "about", "into", "over", "after",
    // French
    "le", "la", "les", "un", "une", "des", "du", "de", "et", "est", "sont", "etait", "etaient",
    "ce", "cette", "ces", "au", "aux", "dans", "sur", "pour", "avec", "ou", "mais", "par",
    "qui", "que", "se", "son", "sa", "ses", "ne", "pas", "plus", "tout", "tous",
];

fn token_re() -> Regex {
    // Identifier-like tokens: letters/digits plus embedded `.`, `_`, `-`
    // so things like `vault_embed.py`, `qdrant-client`, `v1.2` survive as
    // single tokens instead of being shredded into fragments.
    Regex::new(r"[A-Za-z0-9]+(?:[._-][A-Za-z0-9]+)*").expect("static token regex")
}

/// Lowercase, tokenize, and drop stopwords and single-character noise.
pub fn tokenize(text: &str) -> Vec<String> {
    token_re()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

pub struct Bm25Index {
    pub docs: Vec<Bm25Doc>,
}

impl Bm25Index {
    /// Build a fresh index from the current set of notes.
    pub fn build(notes: &[(String, String, String, Option<String>)]) -> Self {
        // (note_id, text_to_index, type, confidence)
        let docs = notes
            .iter()
            .map(|(note_id, text, note_type, confidence)| {
                let tokens = tokenize(text);
                let mut tf: HashMap<String, u32> = HashMap::new();
                for t in &tokens {
                    *tf.entry(t.clone()).or_insert(0) += 1;
                }
                Bm25Doc {
                    note_id: note_id.clone(),
                    tf,
                    len: tokens.len() as u32,
                    description: text.chars().take(200).collect(),
                    note_type: note_type.clone(),
                    confidence: confidence.clone(),
                }
            })
            .collect();

        Self { docs }
    }

    /// Patch a single document into the index in place: replaces the
    /// existing entry for `note_id` if present, otherwise appends a new
    /// one. Used by the indexer's incremental `--note`/`--notes` path so a
    /// single-note reindex doesn't require rebuilding the whole BM25
    /// index from scratch.
    pub fn upsert(&mut self, note_id: &str, text: &str, note_type: &str, confidence: Option<String>) {
        let tokens = tokenize(text);
        let mut tf: HashMap<String, u32> = HashMap::new();
        for t in &tokens {
            *tf.entry(t.clone()).or_insert(0) += 1;
        }
        let doc = Bm25Doc {
            note_id: note_id.to_string(),
            tf,
            len: tokens.len() as u32,
            description: text.chars().take(200).collect(),
            note_type: note_type.to_string(),
            confidence,
        };

        if let Some(existing) = self.docs.iter_mut().find(|d| d.note_id == note_id) {
            *existing = doc;
        } else {
            self.docs.push(doc);
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading BM25 index at {}", path.display()))?;
        let docs: Vec<Bm25Doc> = serde_json::from_str(&text)
            .with_context(|| format!("parsing BM25 index at {}", path.display()))?;
        Ok(Some(Self { docs }))
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.docs)?;
        std::fs::write(path, json).with_context(|| format!("writing BM25 index to {}", path.display()))
    }

    /// Score every document against a tokenized query using Okapi BM25,
    /// returning `(note_id, score)` pairs for documents with any overlap.
    /// Non-matching documents score 0 and are still present in output
    /// order, matching the original's `_score_bm25` semantics.
    pub fn score(&self, query_tokens: &[String]) -> Vec<(String, f32)> {
        if self.docs.is_empty() {
            return vec![];
        }

        let n = self.docs.len() as f32;
        let avg_len: f32 = self.docs.iter().map(|d| d.len as f32).sum::<f32>() / n;

        let mut df: HashMap<&str, u32> = HashMap::new();
        for doc in &self.docs {
            for term in query_tokens {
                if doc.tf.contains_key(term) {
                    *df.entry(term.as_str()).or_insert(0) += 1;
                }
            }
        }

        self.docs
            .iter()
            .map(|doc| {
                let mut score = 0.0f32;
                for term in query_tokens {
                    let Some(&freq) = doc.tf.get(term) else { continue };
                    let freq = freq as f32;
                    let n_q = *df.get(term.as_str()).unwrap_or(&0) as f32;
                    if n_q == 0.0 {
                        continue;
                    }
                    let idf = ((n - n_q + 0.5) / (n_q + 0.5) + 1.0).ln();
                    let denom = freq + K1 * (1.0 - B + B * (doc.len as f32) / avg_len);
                    score += idf * (freq * (K1 + 1.0)) / denom;
                }
                (doc.note_id.clone(), score)
            })
            .collect()
    }
}
