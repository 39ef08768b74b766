//! Wikilink resolution and rewriting.
//!
//! Notes reference each other as `[[note-id]]` or `[[note-id|display text]]`.
//! LLM-authored content instead writes human titles (`[[My Full Title]]`),
//! so before anything is written back to the vault every link is resolved
//! against a title→id map and a set of known ids: a title resolves to its
//! id, a link that already names a known id is left alone, and anything
//! else is stripped down to plain text (its display text if present,
//! otherwise its original label) so the vault never accumulates dead links.

use std::collections::{HashMap, HashSet};

use regex::Regex;

fn wikilink_re() -> Regex {
    Regex::new(r"\[\[([^\]|]+)(?:\|([^\]]+))?\]\]").expect("static wikilink regex")
}

/// Rewrite every `[[...]]` span in `content` against `title_to_id` (titles
/// lowercased as keys, mapping to canonical note ids) and `valid_ids` (the
/// set of ids known to exist in the vault right now).
pub fn fix_wikilinks_in_content(
    content: &str,
    title_to_id: &HashMap<String, String>,
    valid_ids: &HashSet<String>,
) -> String {
    let re = wikilink_re();
    let mut out = String::with_capacity(content.len());
    let mut last_end = 0;

    for caps in re.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        out.push_str(&content[last_end..whole.start()]);

        let target = caps.get(1).unwrap().as_str();
        let display = caps.get(2).map(|m| m.as_str());
        let key = target.trim().to_lowercase();

        if let Some(id) = title_to_id.get(&key) {
            match display {
                Some(d) => out.push_str(&format!("[[{id}|{d}]]")),
                None => out.push_str(&format!("[[{id}]]")),
            }
        } else if valid_ids.contains(&key) {
            match display {
                Some(d) => out.push_str(&format!("[[{key}|{d}]]")),
                None => out.push_str(&format!("[[{key}]]")),
            }
        } else {
            out.push_str(display.unwrap_or(target));
        }

        last_end = whole.end();
    }

    out.push_str(&content[last_end..]);
    out
}

/// Extract the set of note ids a note's body links to, for graph
/// construction. Unlike `fix_wikilinks_in_content` this does not rewrite
/// anything; a target is kept only if it has no whitespace, is under 60
/// chars, and is a known id — matching the original's "unknown ids
/// excluded, self-links allowed" behavior for `build_graph_index`.
pub fn extract_links(content: &str, valid_ids: &HashSet<String>) -> Vec<String> {
    let re = wikilink_re();
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for caps in re.captures_iter(content) {
        let target = caps.get(1).unwrap().as_str().trim().to_lowercase();
        let well_formed = !target.is_empty() && target.len() < 60 && !target.chars().any(char::is_whitespace);
        if well_formed && valid_ids.contains(&target) && seen.insert(target.clone()) {
            links.push(target);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (HashMap<String, String>, HashSet<String>) {
        let valid_ids: HashSet<String> = ["note-a", "note-b", "note-c"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let title_to_id: HashMap<String, String> = [
            ("my full title", "note-a"),
            ("another title", "note-b"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        (title_to_id, valid_ids)
    }

    #[test]
    fn valid_id_unchanged() {
        let (t, v) = fixture();
        let content = "See [[note-a]] for details.";
        assert_eq!(fix_wikilinks_in_content(content, &t, &v), "See [[note-a]] for details.");
    }

    #[test]
    fn title_replaced_with_id() {
        let (t, v) = fixture();
        let content = "See [[My Full Title]] for details.";
        assert_eq!(fix_wikilinks_in_content(content, &t, &v), "See [[note-a]] for details.");
    }

    #[test]
    fn unresolvable_link_stripped() {
        let (t, v) = fixture();
        let content = "See [[Unknown Note]] for details.";
        assert_eq!(fix_wikilinks_in_content(content, &t, &v), "See Unknown Note for details.");
    }

    #[test]
    fn display_text_preserved() {
        let (t, v) = fixture();
        let content = "See [[My Full Title|the link]] for details.";
        assert_eq!(
            fix_wikilinks_in_content(content, &t, &v),
            "See [[note-a|the link]] for details."
        );
    }

    #[test]
    fn unresolvable_with_display_text() {
        let (t, v) = fixture();
        let content = "See [[Unknown|display]] for details.";
        assert_eq!(fix_wikilinks_in_content(content, &t, &v), "See display for details.");
    }

    #[test]
    fn multiple_links() {
        let (t, v) = fixture();
        let content = "[[note-a]] and [[Another Title]] and [[unknown]]";
        assert_eq!(
            fix_wikilinks_in_content(content, &t, &v),
            "[[note-a]] and [[note-b]] and unknown"
        );
    }

    #[test]
    fn extract_links_drops_unknown_keeps_self() {
        let v: HashSet<String> = ["note-a", "note-b"].iter().map(|s| s.to_string()).collect();
        let content = "[[note-a]] [[note-a]] [[missing]] [[note-b]]";
        assert_eq!(extract_links(content, &v), vec!["note-a", "note-b"]);
    }
}
