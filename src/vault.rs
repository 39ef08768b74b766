//! The Vault Store: reading, parsing and atomically rewriting markdown
//! notes on disk. Frontmatter parsing follows the original's `parse_note`
//! (simple `^key:\s*value$` line scanning, not a full YAML parser — the
//! vault's frontmatter is never more than flat scalar fields) generalized
//! to the richer field set this crate's notes carry (confidence, relation,
//! parent_note, superseded_by, forget_after, stale/stale_since).

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use crate::models::{Confidence, Note, Relation};

const EMBED_TEXT_MAX_CHARS: usize = 4000;

/// List markdown note paths directly under `dir` (no recursion), skipping
/// dotfiles and underscore-prefixed paths (archive/source directories).
pub fn list_notes(dir: &Path) -> Result<Vec<PathBuf>> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(vec![]);
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?.to_string();
            if name.starts_with('.') || name.starts_with('_') {
                return None;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                Some(path)
            } else {
                None
            }
        })
        .collect();

    paths.sort();
    Ok(paths)
}

fn frontmatter_re() -> Regex {
    Regex::new(r"(?s)^---\n(.*?)\n---\n?").expect("static frontmatter regex")
}

/// Split raw note text into its frontmatter block (parsed into a flat map)
/// and the body with the frontmatter stripped and trimmed.
pub fn parse_frontmatter(text: &str) -> (HashMap<String, String>, String) {
    let re = frontmatter_re();
    let Some(caps) = re.captures(text) else {
        return (HashMap::new(), text.trim().to_string());
    };

    let block = caps.get(1).unwrap().as_str();
    let mut fields = HashMap::new();
    for line in block.lines() {
        if let Some((k, v)) = line.split_once(':') {
            fields.insert(k.trim().to_string(), v.trim().to_string());
        }
    }

    let body = text[caps.get(0).unwrap().end()..].trim().to_string();
    (fields, body)
}

/// Extract a note's first `# Heading` line, used both as a description
/// fallback and as the display title resolved by wikilink rewriting.
pub fn extract_title(text: &str) -> Option<String> {
    Regex::new(r"(?m)^#\s+(.+)$")
        .expect("static title regex")
        .captures(text)
        .and_then(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
}

/// Parse a note file into the full `Note` model.
pub fn parse_note(path: &Path) -> Result<Note> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading note {}", path.display()))?;

    let note_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let (fields, body) = parse_frontmatter(&text);
    let title = extract_title(&text);

    let description = fields
        .get("description")
        .cloned()
        .or(title)
        .unwrap_or_else(|| note_id.clone());

    let note_type = fields.get("type").cloned().unwrap_or_else(|| "concept".to_string());
    let created = fields
        .get("created")
        .cloned()
        .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());

    let confidence = fields
        .get("confidence")
        .and_then(|v| v.parse::<Confidence>().ok());
    let relation = fields.get("relation").and_then(|v| match v.to_lowercase().as_str() {
        "new" => Some(Relation::New),
        "updates" => Some(Relation::Updates),
        "extends" => Some(Relation::Extends),
        _ => None,
    });

    let stale = fields
        .get("stale")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let embed_text: String = format!("{description}\n\n{body}")
        .chars()
        .take(EMBED_TEXT_MAX_CHARS)
        .collect();

    Ok(Note {
        note_id,
        description,
        note_type,
        created,
        confidence,
        relation,
        parent_note: fields.get("parent_note").cloned(),
        superseded_by: fields.get("superseded_by").cloned(),
        forget_after: fields.get("forget_after").cloned(),
        stale,
        stale_since: fields.get("stale_since").cloned(),
        frontmatter: fields,
        body,
        embed_text,
    })
}

/// Re-serialize a note's frontmatter map (in a stable, readable field
/// order) plus body back into full note text.
pub fn render_note(fields: &HashMap<String, String>, body: &str) -> String {
    const ORDER: &[&str] = &[
        "description",
        "type",
        "confidence",
        "created",
        "relation",
        "parent_note",
        "superseded_by",
        "forget_after",
        "stale",
        "stale_since",
    ];

    let mut out = String::from("---\n");
    for key in ORDER {
        if let Some(v) = fields.get(*key) {
            out.push_str(&format!("{key}: {v}\n"));
        }
    }
    for (k, v) in fields {
        if !ORDER.contains(&k.as_str()) {
            out.push_str(&format!("{k}: {v}\n"));
        }
    }
    out.push_str("---\n\n");
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

/// Atomically write `contents` to `path`: write to a sibling temp file
/// then rename over the destination so a concurrent reader never observes
/// a partially written note.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| anyhow::anyhow!("renaming temp file over {}: {}", path.display(), e.error))?;
    Ok(())
}

/// Idempotently set a single frontmatter field on disk, leaving the rest
/// of the note untouched. No-ops if the field already has that value.
pub fn inject_frontmatter_field(path: &Path, key: &str, value: &str) -> Result<()> {
    let text = fs::read_to_string(path)?;
    let (mut fields, body) = parse_frontmatter(&text);

    if fields.get(key).map(|s| s.as_str()) == Some(value) {
        return Ok(());
    }

    fields.insert(key.to_string(), value.to_string());
    write_atomic(path, &render_note(&fields, &body))
}

/// Mark a note as superseded by another, used when an UPDATES fact lands.
pub fn add_superseded_by(path: &Path, superseding_id: &str) -> Result<()> {
    inject_frontmatter_field(path, "superseded_by", superseding_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_full_frontmatter() {
        let text = "---\ndescription: Uses pytest for testing\ntype: preference\nconfidence: confirmed\ncreated: 2026-01-15\n---\n\nBody text here.";
        let (fields, body) = parse_frontmatter(text);
        assert_eq!(fields.get("description").unwrap(), "Uses pytest for testing");
        assert_eq!(fields.get("type").unwrap(), "preference");
        assert_eq!(fields.get("confidence").unwrap(), "confirmed");
        assert_eq!(fields.get("created").unwrap(), "2026-01-15");
        assert_eq!(body, "Body text here.");
    }

    #[test]
    fn falls_back_to_title_then_stem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no-frontmatter.md");
        fs::write(&path, "# A Title Here\n\nSome body.").unwrap();

        let note = parse_note(&path).unwrap();
        assert_eq!(note.description, "A Title Here");
        assert_eq!(note.note_type, "concept");
        assert_eq!(note.note_id, "no-frontmatter");
    }

    #[test]
    fn write_atomic_then_reparse_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note-a.md");

        let mut fields = HashMap::new();
        fields.insert("description".to_string(), "A test note".to_string());
        fields.insert("type".to_string(), "fact".to_string());
        fields.insert("created".to_string(), "2026-01-01".to_string());

        write_atomic(&path, &render_note(&fields, "Body content.")).unwrap();
        let note = parse_note(&path).unwrap();
        assert_eq!(note.description, "A test note");
        assert_eq!(note.body, "Body content.");
    }

    #[test]
    fn inject_field_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note-a.md");
        fs::write(&path, "---\ndescription: D\ntype: fact\ncreated: 2026-01-01\n---\n\nBody.").unwrap();

        inject_frontmatter_field(&path, "stale", "true").unwrap();
        let first = fs::read_to_string(&path).unwrap();
        inject_frontmatter_field(&path, "stale", "true").unwrap();
        let second = fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn list_notes_skips_hidden_and_underscore() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "x").unwrap();
        fs::write(dir.path().join(".hidden.md"), "x").unwrap();
        fs::write(dir.path().join("_archived.md"), "x").unwrap();
        fs::write(dir.path().join("not-markdown.txt"), "x").unwrap();

        let notes = list_notes(dir.path()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].file_name().unwrap(), "a.md");
    }
}
