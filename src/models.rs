//! Core data types shared across the vault, index, retrieval, extraction
//! and reflector components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a note came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    New,
    Updates,
    Extends,
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Relation::New => "new",
            Relation::Updates => "updates",
            Relation::Extends => "extends",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Experimental,
    Confirmed,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Experimental => "experimental",
            Confidence::Confirmed => "confirmed",
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => Ok(Confidence::Confirmed),
            "experimental" => Ok(Confidence::Experimental),
            _ => Err(()),
        }
    }
}

/// A parsed note: frontmatter fields plus body, ready for embedding,
/// indexing or rewriting.
#[derive(Debug, Clone)]
pub struct Note {
    pub note_id: String,
    pub description: String,
    pub note_type: String,
    pub created: String,
    pub confidence: Option<Confidence>,
    pub relation: Option<Relation>,
    pub parent_note: Option<String>,
    pub superseded_by: Option<String>,
    pub forget_after: Option<String>,
    pub stale: bool,
    pub stale_since: Option<String>,
    /// Full raw frontmatter fields, including ones not broken out above.
    pub frontmatter: HashMap<String, String>,
    /// Body markdown with frontmatter stripped.
    pub body: String,
    /// `description + "\n\n" + body`, truncated to ~4000 chars.
    pub embed_text: String,
}

/// Payload mirrored onto a vector point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub note_id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub note_type: String,
    pub created: String,
    pub confidence: Option<String>,
    pub last_retrieved: String,
    pub updated_at: String,
}

/// One hit from a vector or BM25 search, or a fused/scored candidate.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredNote {
    pub note_id: String,
    pub payload: Option<VectorPayload>,
    pub score: f32,
}

/// A BM25 document record, persisted verbatim as part of the index JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Doc {
    pub note_id: String,
    pub tf: HashMap<String, u32>,
    pub len: u32,
    pub description: String,
    #[serde(rename = "type")]
    pub note_type: String,
    pub confidence: Option<String>,
}

/// The persisted, incrementally-patched link graph.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphCache {
    pub built_at: String,
    pub note_count: usize,
    pub outbound: HashMap<String, Vec<String>>,
    pub backlinks: HashMap<String, Vec<String>>,
    pub last_incremental: Option<String>,
}

/// An extraction ticket dropped in the queue directory by the (external)
/// transcript-capture hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub session_id: String,
    pub transcript_path: String,
    pub cwd: String,
    pub turn_count: u64,
    pub enqueued_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
}

/// A single extracted fact as returned (as JSON) by the extraction LLM,
/// before it has been normalized, deduped or applied to the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub note_id: String,
    /// `"NEW"`, `"UPDATES:<id>"` or `"EXTENDS:<id>"`.
    pub relation: String,
    pub content: String,
}

/// A fact after the relation string has been split into a typed
/// `Relation` plus an optional target note id.
#[derive(Debug, Clone)]
pub struct NormalizedFact {
    pub note_id: String,
    pub relation: Relation,
    pub target: Option<String>,
    pub content: String,
}
