//! Note id sanitization.
//!
//! Mirrors `sanitize_note_id` from the original `process_queue.py`: lowercase
//! ASCII alphanumerics and `-`, Unicode-normalized to strip combining marks,
//! collapsed runs of `-`, trimmed, capped at 80 chars with no trailing `-`.

use unicode_normalization::UnicodeNormalization;

const MAX_LEN: usize = 80;

/// Normalize an arbitrary string into a kebab-case note id.
pub fn sanitize_note_id(input: &str) -> String {
    // NFKD decomposes accented letters into base + combining marks, which
    // we then drop, e.g. "café" -> "cafe".
    let stripped: String = input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    let mut out = String::with_capacity(stripped.len());
    let mut last_was_dash = false;
    for c in stripped.chars() {
        let lower = c.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() {
            out.push(lower);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }

    let trimmed = out.trim_matches('-');
    let mut truncated = trimmed.chars().take(MAX_LEN).collect::<String>();
    while truncated.ends_with('-') {
        truncated.pop();
    }
    truncated
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_kebab() {
        assert_eq!(sanitize_note_id("my-note-slug"), "my-note-slug");
    }

    #[test]
    fn spaces_to_hyphens() {
        assert_eq!(sanitize_note_id("my note slug"), "my-note-slug");
    }

    #[test]
    fn uppercase_to_lower() {
        assert_eq!(sanitize_note_id("My-Note-SLUG"), "my-note-slug");
    }

    #[test]
    fn special_chars_removed() {
        assert_eq!(sanitize_note_id("note@#$%with!chars"), "note-with-chars");
    }

    #[test]
    fn multiple_hyphens_collapsed() {
        assert_eq!(sanitize_note_id("note---with---hyphens"), "note-with-hyphens");
    }

    #[test]
    fn leading_trailing_hyphens_stripped() {
        assert_eq!(sanitize_note_id("--note-slug--"), "note-slug");
    }

    #[test]
    fn max_length_80() {
        let long_id = "a".repeat(100);
        let result = sanitize_note_id(&long_id);
        assert!(result.len() <= 80);
    }

    #[test]
    fn truncation_no_trailing_hyphen() {
        let long_id = format!("{}-{}", "a".repeat(79), "b".repeat(20));
        let result = sanitize_note_id(&long_id);
        assert!(!result.ends_with('-'));
        assert!(result.len() <= 80);
    }

    #[test]
    fn unicode_normalized() {
        assert_eq!(sanitize_note_id("café-crème"), "cafe-creme");
    }

    #[test]
    fn empty_string() {
        assert_eq!(sanitize_note_id(""), "");
    }

    #[test]
    fn only_special_chars() {
        assert_eq!(sanitize_note_id("@#$%"), "");
    }

    #[test]
    fn numbers_preserved() {
        assert_eq!(sanitize_note_id("v2-api-endpoint-3"), "v2-api-endpoint-3");
    }

    #[test]
    fn dots_become_hyphens() {
        assert_eq!(sanitize_note_id("config.example.py"), "config-example-py");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_note_id("Some Raw Title!!");
        let twice = sanitize_note_id(&once);
        assert_eq!(once, twice);
    }
}
