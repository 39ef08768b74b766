//! Source chunks: verbatim excerpts of the transcript a note was
//! extracted from, kept alongside the vault as `_sources/<note_id>.md`
//! so retrieval can inject a short snippet of original context next to
//! the top hit. Carries a mini-frontmatter (`source_for`, `captured`,
//! `relation`) the same way `vault.rs` frontmatters notes.

use std::path::Path;

use anyhow::{Context, Result};

use crate::vault;

/// Write (or append, for EXTENDS) a source chunk for `note_id`, capped at
/// `max_chars`. EXTENDS appends have no compaction — the body simply
/// grows, as directed.
pub fn write_chunk(
    source_dir: &Path,
    note_id: &str,
    chunk: &str,
    max_chars: usize,
    relation: &str,
    append: bool,
) -> Result<()> {
    std::fs::create_dir_all(source_dir)?;
    let path = source_dir.join(format!("{note_id}.md"));
    let truncated: String = chunk.chars().take(max_chars).collect();

    let body = if append && path.exists() {
        let existing_text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading source chunk to append at {}", path.display()))?;
        let (_, existing_body) = vault::parse_frontmatter(&existing_text);
        format!("{existing_body}\n\n---\n\n{truncated}")
    } else {
        truncated
    };

    let captured = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let rendered = format!(
        "---\nsource_for: {note_id}\ncaptured: {captured}\nrelation: {relation}\n---\n\n{}\n",
        body.trim_end()
    );
    std::fs::write(&path, rendered).with_context(|| format!("writing source chunk to {}", path.display()))
}

/// Read and cap a note's source chunk for injection into a retrieval
/// result. Missing chunks are not an error — most notes won't have one.
pub fn read_chunk_for_injection(source_dir: &Path, note_id: &str, inject_max_chars: usize) -> Result<Option<String>> {
    let path = source_dir.join(format!("{note_id}.md"));
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading source chunk at {}", path.display()))?;
    let (_, body) = vault::parse_frontmatter(&text);
    Ok(Some(body.chars().take(inject_max_chars).collect()))
}
