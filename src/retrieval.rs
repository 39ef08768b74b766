//! The hybrid Retrieval Engine: vector k-NN + BM25 fused by Reciprocal
//! Rank Fusion, optionally reranked, scored by temporal decay and
//! confidence boost, expanded across the link graph, and finally
//! enriched with a source-chunk excerpt for the top hit.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

use crate::bm25::{tokenize, Bm25Index};
use crate::clients::Clients;
use crate::config::Config;
use crate::embed::EmbedKind;
use crate::models::{GraphCache, ScoredNote, VectorPayload};
use crate::source_chunk;
use crate::vault;

/// One fused candidate before graph expansion: a note id plus whatever
/// payload either search leg could supply.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FusedCandidate {
    pub note_id: String,
    pub payload: Option<VectorPayload>,
    pub rrf_score: f32,
}

/// Reciprocal Rank Fusion over a vector leg and a keyword leg, each
/// already sorted best-first. `k` is the RRF smoothing constant; only the
/// top `top_k` fused results are returned.
pub fn rrf_merge(vector: &[ScoredNote], keyword: &[ScoredNote], k: u32, top_k: usize) -> Vec<FusedCandidate> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut payloads: HashMap<String, Option<VectorPayload>> = HashMap::new();

    let mut accumulate = |list: &[ScoredNote]| {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (k as f32 + rank as f32 + 1.0);
            *scores.entry(hit.note_id.clone()).or_insert(0.0) += contribution;
            payloads
                .entry(hit.note_id.clone())
                .or_insert_with(|| hit.payload.clone());
        }
    };
    accumulate(vector);
    accumulate(keyword);

    let mut fused: Vec<FusedCandidate> = scores
        .into_iter()
        .map(|(note_id, rrf_score)| {
            let payload = payloads.remove(&note_id).flatten();
            FusedCandidate { note_id, payload, rrf_score }
        })
        .collect();

    fused.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap());
    fused.truncate(top_k);
    fused
}

/// Exponential decay of a score, halving every `half_life_days`, floored
/// at `floor` so old-but-true facts never vanish entirely. Reference date
/// is `last_retrieved`, falling back to `created`, falling back to no
/// decay (1.0) if neither parses.
pub fn compute_decay(created: Option<&str>, last_retrieved: Option<&str>) -> f32 {
    compute_decay_with(created, last_retrieved, Utc::now().date_naive(), 90.0, 0.3)
}

pub fn compute_decay_with(
    created: Option<&str>,
    last_retrieved: Option<&str>,
    today: NaiveDate,
    half_life_days: f64,
    floor: f32,
) -> f32 {
    let reference = last_retrieved
        .filter(|s| !s.trim().is_empty())
        .and_then(parse_reference_date)
        .or_else(|| created.and_then(parse_reference_date));

    let Some(reference_date) = reference else { return 1.0 };

    let age_days = (today - reference_date).num_days().max(0) as f64;
    let decay = 0.5f64.powf(age_days / half_life_days) as f32;
    decay.max(floor)
}

/// Note frontmatter dates are plain `%Y-%m-%d`; vector payload timestamps
/// (`last_retrieved`/`updated_at`) are stamped as RFC3339. Accept either.
fn parse_reference_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

/// `CONFIDENCE_BOOST` if the note is `confirmed`, 1.0 otherwise (including
/// `experimental` and absent confidence).
pub fn apply_confidence_boost(confidence: Option<&str>, boost: f32) -> f32 {
    match confidence {
        Some(c) if c.eq_ignore_ascii_case("confirmed") => boost,
        _ => 1.0,
    }
}

/// Round-robin breadth-first expansion across the link graph: backlinks
/// of the primary note first, then depth-1 outbound neighbors, then
/// depth-2 outbound neighbors, each capped per spec. Already-included
/// note ids are skipped.
pub fn expand_graph(
    graph: &GraphCache,
    primary_id: &str,
    already_included: &HashSet<String>,
    max_backlinks_per_note: usize,
    max_secondary: usize,
) -> Vec<String> {
    let mut seen: HashSet<String> = already_included.clone();
    seen.insert(primary_id.to_string());
    let mut expanded = Vec::new();

    let backlinks = graph.backlinks.get(primary_id).cloned().unwrap_or_default();
    for id in backlinks.into_iter().take(max_backlinks_per_note) {
        if seen.insert(id.clone()) {
            expanded.push(id);
        }
    }

    let depth1: Vec<String> = graph.outbound.get(primary_id).cloned().unwrap_or_default();
    let mut depth2_sources = depth1.clone();
    round_robin_fill(&mut expanded, &depth1, &mut seen, max_secondary);

    depth2_sources.retain(|id| graph.outbound.contains_key(id));
    let depth2: Vec<String> = depth2_sources
        .iter()
        .flat_map(|id| graph.outbound.get(id).cloned().unwrap_or_default())
        .collect();
    round_robin_fill(&mut expanded, &depth2, &mut seen, max_secondary);

    expanded
}

fn round_robin_fill(expanded: &mut Vec<String>, candidates: &[String], seen: &mut HashSet<String>, cap: usize) {
    for id in candidates {
        if expanded.len() >= cap {
            break;
        }
        if seen.insert(id.clone()) {
            expanded.push(id.clone());
        }
    }
}

/// Orchestrates the full hybrid retrieval pipeline over an already-loaded
/// BM25 index and graph cache, via the pluggable `Clients`.
pub async fn retrieve(
    clients: &Clients,
    config: &Config,
    bm25: &Bm25Index,
    graph: &GraphCache,
    query: &str,
) -> Result<Vec<FusedCandidate>> {
    if query.trim().chars().count() < config.min_query_length {
        return Ok(vec![]);
    }

    let query_vec = clients
        .embedder
        .embed(&[query.to_string()], EmbedKind::Query)
        .await?;
    let vector_hits = clients
        .vector_store
        .query(&query_vec[0], config.vector_top_k)?;

    let keyword_hits: Vec<ScoredNote> = if config.bm25_enabled {
        let tokens = tokenize(query);
        let mut scored = bm25.score(&tokens);
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .take(config.bm25_top_k)
            .map(|(note_id, score)| ScoredNote { note_id, payload: None, score })
            .collect()
    } else {
        vec![]
    };

    let mut fused = rrf_merge(&vector_hits, &keyword_hits, config.rrf_k, config.rrf_final_top_k);

    let candidate_texts: Vec<String> = fused
        .iter()
        .map(|c| c.payload.as_ref().map(|p| p.description.clone()).unwrap_or_default())
        .collect();

    if config.rerank_enabled && !fused.is_empty() {
        let order = clients.reranker.rerank(query, &candidate_texts).await?;
        fused = order.into_iter().filter_map(|i| fused.get(i).cloned()).collect();
    }

    for candidate in fused.iter_mut() {
        let decay = if config.decay_enabled {
            compute_decay_with(
                candidate.payload.as_ref().map(|p| p.created.as_str()),
                candidate.payload.as_ref().map(|p| p.last_retrieved.as_str()),
                Utc::now().date_naive(),
                config.decay_half_life_days,
                config.decay_floor,
            )
        } else {
            1.0
        };
        let boost = apply_confidence_boost(
            candidate.payload.as_ref().and_then(|p| p.confidence.as_deref()),
            config.confidence_boost,
        );
        candidate.rrf_score *= decay * boost;
    }
    fused.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap());
    fused.retain(|c| c.rrf_score >= config.retrieve_score_threshold);
    fused.truncate(config.retrieve_top_k);

    Ok(fused)
}

/// A graph-expanded secondary note: scored if the vector store still holds
/// its embedding, otherwise padded in from frontmatter with no score.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphHit {
    pub note_id: String,
    pub payload: Option<VectorPayload>,
    pub score: Option<f32>,
}

/// Runs the full pipeline: `retrieve()` for the primaries, then graph BFS
/// expansion (step 7), writeback of `last_retrieved` on every surfaced note
/// (step 9), and the `=== ... ===` stdout context block (step 10). Returns
/// an empty string when there's nothing to show.
pub async fn retrieve_with_context(
    clients: &Clients,
    config: &Config,
    bm25: &Bm25Index,
    graph: &GraphCache,
    query: &str,
) -> Result<String> {
    let primaries = retrieve(clients, config, bm25, graph, query).await?;
    if primaries.is_empty() {
        return Ok(String::new());
    }

    // Step 7: expand each primary's neighborhood in turn (backlinks, then
    // depth-1, then depth-2 outbound), deduping against everything already
    // surfaced and capping the cumulative total at MAX_SECONDARY.
    let mut already: HashSet<String> = primaries.iter().map(|c| c.note_id.clone()).collect();
    let mut expanded_ids: Vec<String> = Vec::new();
    for primary in &primaries {
        if expanded_ids.len() >= config.max_secondary {
            break;
        }
        for id in expand_graph(graph, &primary.note_id, &already, config.max_backlinks_per_note, config.max_secondary)
        {
            if expanded_ids.len() >= config.max_secondary {
                break;
            }
            if already.insert(id.clone()) {
                expanded_ids.push(id);
            }
        }
    }

    let graph_hits = if expanded_ids.is_empty() {
        vec![]
    } else {
        let query_vec = clients.embedder.embed(&[query.to_string()], EmbedKind::Query).await?;
        let scored = clients.vector_store.filtered_query(&query_vec[0], &expanded_ids).unwrap_or_default();

        expanded_ids
            .iter()
            .map(|id| {
                if let Some(hit) = scored.iter().find(|s| &s.note_id == id) {
                    GraphHit { note_id: id.clone(), payload: hit.payload.clone(), score: Some(hit.score) }
                } else {
                    let payload = vault::parse_note(&config.vault_notes_dir.join(format!("{id}.md")))
                        .ok()
                        .map(|note| VectorPayload {
                            note_id: note.note_id,
                            description: note.description,
                            note_type: note.note_type,
                            created: note.created,
                            confidence: note.confidence.map(|c| c.as_str().to_string()),
                            last_retrieved: String::new(),
                            updated_at: String::new(),
                        });
                    GraphHit { note_id: id.clone(), payload, score: None }
                }
            })
            .collect()
    };

    // Step 9: writeback last_retrieved on every note actually surfaced to
    // the caller (primaries unconditionally, graph hits only when scored,
    // since an unscored pad-in isn't backed by a vector point to update).
    let now = Utc::now().to_rfc3339();
    for candidate in &primaries {
        let _ = clients.vector_store.set_last_retrieved(&candidate.note_id, &now);
    }
    for hit in graph_hits.iter().filter(|h| h.score.is_some()) {
        let _ = clients.vector_store.set_last_retrieved(&hit.note_id, &now);
    }

    // Step 8: top-1 primary's source chunk, verbatim excerpt of the
    // transcript it was extracted from.
    let source_context = if config.source_chunks_enabled {
        source_chunk::read_chunk_for_injection(
            &config.source_chunks_dir,
            &primaries[0].note_id,
            config.source_inject_max_chars,
        )
        .unwrap_or(None)
    } else {
        None
    };

    Ok(format_context_block(&primaries, &graph_hits, source_context.as_deref()))
}

fn format_context_block(primaries: &[FusedCandidate], graph_hits: &[GraphHit], source_context: Option<&str>) -> String {
    let mut out = String::from("=== Relevant vault notes ===\n");
    for candidate in primaries {
        out.push_str(&format_primary_line(candidate));
        out.push('\n');
    }

    if let Some(ctx) = source_context {
        let trimmed = ctx.trim();
        if !trimmed.is_empty() {
            out.push('\n');
            out.push_str(trimmed);
            out.push('\n');
        }
    }

    out.push_str("\n=== Connected notes (graph) ===\n");
    for hit in graph_hits {
        out.push_str(&format_graph_line(hit));
        out.push('\n');
    }

    out
}

fn format_primary_line(candidate: &FusedCandidate) -> String {
    let note_type = candidate.payload.as_ref().map(|p| p.note_type.as_str()).unwrap_or("unknown");
    let description = candidate.payload.as_ref().map(|p| p.description.as_str()).unwrap_or("");
    let confirmed = candidate
        .payload
        .as_ref()
        .and_then(|p| p.confidence.as_deref())
        .map(|c| c.eq_ignore_ascii_case("confirmed"))
        .unwrap_or(false);
    let pct = (candidate.rrf_score * 100.0).round().clamp(0.0, 100.0);
    let suffix = if confirmed { " confirmed" } else { "" };
    format!("[[{}]] ({note_type}, {pct:.0}%{suffix}) — {description}", candidate.note_id)
}

fn format_graph_line(hit: &GraphHit) -> String {
    let note_type = hit.payload.as_ref().map(|p| p.note_type.as_str()).unwrap_or("unknown");
    let description = hit.payload.as_ref().map(|p| p.description.as_str()).unwrap_or("");
    match hit.score {
        Some(score) => {
            let pct = (score * 100.0).round().clamp(0.0, 100.0);
            format!("[[{}]] ({note_type}, {pct:.0}%) — {description}", hit.note_id)
        }
        None => format!("[[{}]] ({note_type}) — {description}", hit.note_id),
    }
}
