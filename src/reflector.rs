//! The Reflector: periodic vault maintenance. Finds unclustered notes
//! that are semantically close enough to be merge candidates, flags
//! stale notes (old and never revisited), flags orphans (no inbound or
//! outbound links), and archives notes whose TTL has elapsed.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};

use crate::config::Config;
use crate::models::GraphCache;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Cluster {
    pub seed: String,
    pub members: Vec<String>,
}

/// Group notes into clusters: a seed note plus every other not-yet-
/// clustered note whose cosine similarity to the seed meets the
/// threshold. Each note belongs to at most one cluster (first seed to
/// claim it wins), matching "unclustered note + its unclustered
/// neighbors" from the spec.
pub fn detect_clusters(note_ids: &[String], similarity: impl Fn(&str, &str) -> f32, threshold: f32) -> Vec<Cluster> {
    let mut claimed: HashSet<String> = HashSet::new();
    let mut clusters = Vec::new();

    for seed in note_ids {
        if claimed.contains(seed) {
            continue;
        }
        let mut members = Vec::new();
        for other in note_ids {
            if other == seed || claimed.contains(other) {
                continue;
            }
            if similarity(seed, other) >= threshold {
                members.push(other.clone());
            }
        }
        if !members.is_empty() {
            claimed.insert(seed.clone());
            for m in &members {
                claimed.insert(m.clone());
            }
            clusters.push(Cluster { seed: seed.clone(), members });
        }
    }

    clusters
}

/// Note frontmatter dates are plain `%Y-%m-%d`; vector-store payload
/// timestamps (`last_retrieved`) are RFC3339. Accept either.
fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

/// A note is stale when both its creation date and its last-retrieved
/// date are older than `REFLECT_STALE_DAYS`.
pub fn is_stale(created: &str, last_retrieved: &str, stale_days: i64, today: NaiveDate) -> bool {
    let (Some(created), Some(last_retrieved)) = (parse_flexible_date(created), parse_flexible_date(last_retrieved))
    else {
        return false;
    };
    (today - created).num_days() > stale_days && (today - last_retrieved).num_days() > stale_days
}

/// Cosine similarity between two note embeddings, for cluster detection.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// A note with no outbound links and no backlinks is an orphan.
pub fn is_orphan(graph: &GraphCache, note_id: &str) -> bool {
    graph.outbound.get(note_id).map(|v| v.is_empty()).unwrap_or(true)
        && graph.backlinks.get(note_id).map(|v| v.is_empty()).unwrap_or(true)
}

/// Whether a note's TTL has elapsed: an explicit `forget_after` date
/// takes precedence; otherwise fall back to `FORGET_DEFAULT_TTL_DAYS`
/// keyed by note type, if the config defines one for that type.
pub fn should_archive(
    created: &str,
    forget_after: Option<&str>,
    note_type: &str,
    config: &Config,
    today: NaiveDate,
) -> bool {
    if let Some(forget_after) = forget_after {
        if let Ok(date) = NaiveDate::parse_from_str(forget_after, "%Y-%m-%d") {
            return today >= date;
        }
        return false;
    }

    let Some(ttl_days) = config.forget_default_ttl_days.get(note_type) else {
        return false;
    };
    let Ok(created_date) = NaiveDate::parse_from_str(created, "%Y-%m-%d") else {
        return false;
    };
    (today - created_date).num_days() > *ttl_days
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
