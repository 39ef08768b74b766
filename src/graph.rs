//! The link graph: outbound wikilinks per note plus the derived backlink
//! index, persisted as `GraphCache`. `build_full` mirrors the original's
//! `build_graph_index` (self-links allowed, unknown ids excluded, outbound
//! lists deduplicated); `patch_incremental` applies the five-step
//! incremental update a single note write triggers, so a full rebuild
//! isn't needed on every save.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::models::GraphCache;
use crate::wikilinks::extract_links;

/// Build outbound + backlink maps from scratch over the full note set.
pub fn build_full(notes: &[(String, String)]) -> GraphCache {
    // (note_id, body)
    let valid_ids: HashSet<String> = notes.iter().map(|(id, _)| id.clone()).collect();

    let mut outbound: HashMap<String, Vec<String>> = HashMap::new();
    let mut backlinks: HashMap<String, Vec<String>> = HashMap::new();

    for (note_id, body) in notes {
        let links = extract_links(body, &valid_ids);
        for target in &links {
            backlinks.entry(target.clone()).or_default().push(note_id.clone());
        }
        outbound.insert(note_id.clone(), links);
    }

    GraphCache {
        built_at: Utc::now().to_rfc3339(),
        note_count: notes.len(),
        outbound,
        backlinks,
        last_incremental: None,
    }
}

/// Apply a single note's new link set to an existing cache without
/// rebuilding from scratch:
/// 1. Look up the note's previous outbound list (empty if new).
/// 2. Remove the note from the backlink list of every previously-linked
///    target.
/// 3. Recompute the note's outbound list against the current valid-id set.
/// 4. Add the note to the backlink list of every newly-linked target.
/// 5. Stamp `last_incremental` with the current time.
pub fn patch_incremental(cache: &mut GraphCache, note_id: &str, new_body: &str, valid_ids: &HashSet<String>) {
    let previous = cache.outbound.get(note_id).cloned().unwrap_or_default();

    for old_target in &previous {
        if let Some(list) = cache.backlinks.get_mut(old_target) {
            list.retain(|id| id != note_id);
        }
    }

    let new_links = extract_links(new_body, valid_ids);
    for target in &new_links {
        let list = cache.backlinks.entry(target.clone()).or_default();
        if !list.contains(&note_id.to_string()) {
            list.push(note_id.to_string());
        }
    }

    cache.outbound.insert(note_id.to_string(), new_links);
    cache.last_incremental = Some(Utc::now().to_rfc3339());
}

pub fn load(path: &Path) -> Result<Option<GraphCache>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading graph cache at {}", path.display()))?;
    Ok(Some(serde_json::from_str(&text)?))
}

pub fn persist(cache: &GraphCache, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cache)?;
    std::fs::write(path, json).with_context(|| format!("writing graph cache to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_graph() {
        let notes = vec![
            ("note-a".to_string(), "See [[note-b]] and [[note-c]]".to_string()),
            ("note-b".to_string(), "Back to [[note-a]]".to_string()),
            ("note-c".to_string(), "No links here".to_string()),
        ];
        let cache = build_full(&notes);

        let mut a_out = cache.outbound["note-a"].clone();
        a_out.sort();
        assert_eq!(a_out, vec!["note-b", "note-c"]);
        assert_eq!(cache.outbound["note-b"], vec!["note-a"]);
        assert_eq!(cache.outbound["note-c"], Vec::<String>::new());

        assert!(cache.backlinks["note-b"].contains(&"note-a".to_string()));
        assert!(cache.backlinks["note-c"].contains(&"note-a".to_string()));
        assert!(cache.backlinks["note-a"].contains(&"note-b".to_string()));
    }

    #[test]
    fn unknown_links_excluded() {
        let notes = vec![("note-a".to_string(), "See [[nonexistent]] and [[note-a]]".to_string())];
        let cache = build_full(&notes);
        assert!(!cache.outbound["note-a"].contains(&"nonexistent".to_string()));
    }

    #[test]
    fn empty_notes() {
        let cache = build_full(&[]);
        assert!(cache.outbound.is_empty());
        assert!(cache.backlinks.is_empty());
    }

    #[test]
    fn dedup_links() {
        let notes = vec![
            ("note-a".to_string(), "[[note-b]] and again [[note-b]]".to_string()),
            ("note-b".to_string(), "".to_string()),
        ];
        let cache = build_full(&notes);
        assert_eq!(cache.outbound["note-a"], vec!["note-b"]);
    }

    #[test]
    fn incremental_patch_moves_backlinks() {
        let notes = vec![
            ("note-a".to_string(), "[[note-b]]".to_string()),
            ("note-b".to_string(), "".to_string()),
            ("note-c".to_string(), "".to_string()),
        ];
        let mut cache = build_full(&notes);
        assert!(cache.backlinks["note-b"].contains(&"note-a".to_string()));

        let valid_ids: HashSet<String> = notes.iter().map(|(id, _)| id.clone()).collect();
        patch_incremental(&mut cache, "note-a", "[[note-c]]", &valid_ids);

        assert!(!cache.backlinks.get("note-b").map(|v| v.contains(&"note-a".to_string())).unwrap_or(false));
        assert!(cache.backlinks["note-c"].contains(&"note-a".to_string()));
        assert_eq!(cache.outbound["note-a"], vec!["note-c"]);
        assert!(cache.last_incremental.is_some());
    }
}
