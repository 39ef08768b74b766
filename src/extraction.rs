//! The Extraction Engine: turns a raw session transcript into vault
//! writes. Tails and sanitizes the transcript, prompts the extraction
//! LLM, repairs its occasionally-malformed JSON, optionally validates
//! facts against the conversation, deduplicates against existing notes,
//! and applies each fact's relation (NEW/UPDATES/EXTENDS) atomically.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

use crate::clients::Clients;
use crate::embed::EmbedKind;
use crate::models::{ExtractedFact, NormalizedFact, Relation};
use crate::slug::sanitize_note_id;
use crate::vault::{self, render_note};
use crate::wikilinks::fix_wikilinks_in_content;

const TAIL_TARGET_CHARS: usize = 40_000;
const MAX_MESSAGE_CHARS: usize = 4_000;

/// Drop `tool_use`/`tool_result` blocks from a JSONL transcript line,
/// keeping only human-readable `user`/`assistant` text content, and cap
/// each message at `MAX_MESSAGE_CHARS`.
pub fn strip_tool_use_blocks(transcript_line: &Value) -> Option<String> {
    let role = transcript_line.get("type")?.as_str()?;
    if role != "user" && role != "assistant" {
        return None;
    }

    let content = transcript_line
        .get("message")
        .and_then(|m| m.get("content"))?;

    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| {
                if p.get("type").and_then(|t| t.as_str()) == Some("text") {
                    p.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };

    if text.trim().is_empty() {
        return None;
    }

    let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    Some(format!("{role}: {truncated}"))
}

/// Parse a JSONL transcript into role-prefixed lines, then keep only the
/// tail that fits in `TAIL_TARGET_CHARS`, reordered oldest-first so the
/// LLM still reads a coherent conversation.
pub fn tail_transcript(jsonl: &str) -> String {
    let lines: Vec<String> = jsonl
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|v| strip_tool_use_blocks(&v))
        .collect();

    let mut kept: Vec<String> = Vec::new();
    let mut total = 0usize;
    for line in lines.into_iter().rev() {
        if total + line.len() > TAIL_TARGET_CHARS && !kept.is_empty() {
            break;
        }
        total += line.len();
        kept.push(line);
    }
    kept.reverse();
    kept.join("\n\n")
}

fn sentinel_tag_re() -> Regex {
    Regex::new(r"(?s)<([a-zA-Z][a-zA-Z0-9_-]*)>.*?</\1>").expect("static sentinel tag regex")
}

/// Strip UI sentinel tags (`<system-reminder>...</system-reminder>` and
/// similar harness-injected wrapper tags) that carry no durable signal for
/// extraction.
pub fn strip_sentinel_tags(text: &str) -> String {
    sentinel_tag_re().replace_all(text, "").to_string()
}

fn code_block_re() -> Regex {
    Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\n(.*?)```").expect("static code block regex")
}

/// Truncate any fenced code block over `max_chars`, leaving a
/// `[truncated N chars]` marker where the cut happened.
pub fn truncate_code_blocks(text: &str, max_chars: usize) -> String {
    let re = code_block_re();
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;

    for caps in re.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        out.push_str(&text[last_end..whole.start()]);

        let lang = caps.get(1).unwrap().as_str();
        let body = caps.get(2).unwrap().as_str();

        if body.len() > max_chars {
            let kept: String = body.chars().take(max_chars).collect();
            let dropped = body.len() - kept.len();
            out.push_str(&format!("```{lang}\n{kept}\n[truncated {dropped} chars]\n```"));
        } else {
            out.push_str(whole.as_str());
        }

        last_end = whole.end();
    }

    out.push_str(&text[last_end..]);
    out
}

/// Escape stray literal newlines and tabs that appear *inside* JSON
/// string literals (outside of strings they're legitimate formatting
/// whitespace and must be left alone). A tiny state machine tracks
/// whether we're inside a `"..."` span, honoring backslash escapes so an
/// already-escaped `\n` is never double-escaped.
pub fn repair_json_newlines(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\t' if in_string => out.push_str("\\t"),
            '\r' if in_string => out.push_str("\\r"),
            _ => out.push(c),
        }
    }

    out
}

/// Parse extraction output into facts, applying the JSON repair pass on
/// first failure.
pub fn parse_extracted_facts(raw: &str) -> Result<Vec<ExtractedFact>> {
    serde_json::from_str(raw).or_else(|first_err| {
        let repaired = repair_json_newlines(raw);
        serde_json::from_str(&repaired)
            .with_context(|| format!("failed to parse extraction JSON even after repair: {first_err}"))
    })
}

/// Render the existing-notes summary injected into the extraction prompt:
/// up to 80 `- <id>: <description>` lines.
pub fn format_existing_notes(notes: &[(String, String)]) -> String {
    notes
        .iter()
        .take(80)
        .map(|(id, description)| format!("- {id}: {description}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse the validation pass's response: the subset of facts judged
/// grounded, returned in the same `{note_id, relation, content}` shape
/// they were submitted in (per `prompt::Prompt::Validation`'s contract).
pub fn parse_validated_facts(raw: &str) -> Result<Vec<ExtractedFact>> {
    serde_json::from_str(raw).or_else(|first_err| {
        let repaired = repair_json_newlines(raw);
        serde_json::from_str(&repaired)
            .with_context(|| format!("failed to parse validation JSON even after repair: {first_err}"))
    })
}

/// Split a fact's `relation` string (`"NEW"`, `"UPDATES:<id>"`,
/// `"EXTENDS:<id>"`) into a typed relation and optional target.
pub fn normalize_fact(fact: &ExtractedFact) -> NormalizedFact {
    let note_id = sanitize_note_id(&fact.note_id);

    let (relation, target) = match fact.relation.split_once(':') {
        Some(("UPDATES", target)) => (Relation::Updates, Some(target.trim().to_string())),
        Some(("EXTENDS", target)) => (Relation::Extends, Some(target.trim().to_string())),
        _ => (Relation::New, None),
    };

    NormalizedFact { note_id, relation, target, content: fact.content.clone() }
}

/// Honors `VALIDATION_ENABLED`: when disabled, every fact passes through
/// unchanged. When enabled, `is_grounded` decides per fact (normally
/// backed by an LLM validation pass).
pub fn validate_extracted_facts(
    facts: Vec<ExtractedFact>,
    enabled: bool,
    is_grounded: impl Fn(&ExtractedFact) -> bool,
) -> Vec<ExtractedFact> {
    if !enabled || facts.is_empty() {
        return facts;
    }
    facts.into_iter().filter(|f| is_grounded(f)).collect()
}

/// Find the highest-similarity existing NEW-candidate note above
/// `dedup_threshold`, if any — used to rewrite a would-be NEW fact into
/// an EXTENDS of the note it duplicates.
pub fn find_semantic_duplicate(
    candidate_vec: &[f32],
    existing: &[(String, Vec<f32>)],
    dedup_threshold: f32,
) -> Option<String> {
    existing
        .iter()
        .map(|(id, v)| (id, cosine(candidate_vec, v)))
        .filter(|(_, sim)| *sim >= dedup_threshold)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(id, _)| id.clone())
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

/// Apply a single normalized fact to the vault:
/// - NEW: write a fresh note file.
/// - UPDATES: inject `relation: updates` + `parent_note: <target>` and
///   overwrite the target note in place with the new content; no new file
///   is created (falls back to NEW if the target doesn't exist).
/// - EXTENDS: append the fact's content to the target note's body behind
///   an `Auto-extension` delimiter (falls back to NEW if the target
///   doesn't exist).
pub fn apply_fact(
    vault_dir: &Path,
    fact: &NormalizedFact,
    valid_ids: &std::collections::HashSet<String>,
    title_to_id: &HashMap<String, String>,
) -> Result<String> {
    let content = fix_wikilinks_in_content(&fact.content, title_to_id, valid_ids);

    match (&fact.relation, &fact.target) {
        (Relation::Updates, Some(target)) if valid_ids.contains(target) => {
            let mut fields = HashMap::new();
            fields.insert("description".to_string(), first_line(&content));
            fields.insert("type".to_string(), "fact".to_string());
            fields.insert("created".to_string(), chrono::Utc::now().format("%Y-%m-%d").to_string());
            fields.insert("relation".to_string(), "updates".to_string());
            fields.insert("parent_note".to_string(), target.clone());

            let path = vault_dir.join(format!("{target}.md"));
            vault::write_atomic(&path, &render_note(&fields, &content))?;
            Ok(target.clone())
        }
        (Relation::Extends, Some(target)) if valid_ids.contains(target) => {
            let path = vault_dir.join(format!("{target}.md"));
            let existing = std::fs::read_to_string(&path)
                .with_context(|| format!("reading note to extend at {}", path.display()))?;
            let (fields, body) = vault::parse_frontmatter(&existing);
            let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
            let merged_body =
                format!("{body}\n\n--- \n*Auto-extension {today} (from: {}):*\n\n{content}", fact.note_id);
            vault::write_atomic(&path, &render_note(&fields, &merged_body))?;
            Ok(target.clone())
        }
        _ => {
            write_new_note(vault_dir, &fact.note_id, &content)?;
            Ok(fact.note_id.clone())
        }
    }
}

fn write_new_note(vault_dir: &Path, note_id: &str, content: &str) -> Result<()> {
    let mut fields = HashMap::new();
    fields.insert("description".to_string(), first_line(content));
    fields.insert("type".to_string(), "fact".to_string());
    fields.insert("created".to_string(), chrono::Utc::now().format("%Y-%m-%d").to_string());
    fields.insert("relation".to_string(), "new".to_string());

    let path = vault_dir.join(format!("{note_id}.md"));
    vault::write_atomic(&path, &render_note(&fields, content))
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or(text).chars().take(120).collect()
}

/// Embed a fact's content for dedup comparison against existing notes.
pub async fn embed_fact_content(clients: &Clients, content: &str) -> Result<Vec<f32>> {
    let vectors = clients.embedder.embed(&[content.to_string()], EmbedKind::Document).await?;
    Ok(vectors.into_iter().next().unwrap_or_default())
}
