use std::collections::{HashMap, HashSet};
use std::io::Read as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vault_memory::bm25::Bm25Index;
use vault_memory::clients::Clients;
use vault_memory::config::Config;
use vault_memory::embed::{EmbedKind, FastEmbedEmbedder};
use vault_memory::extraction;
use vault_memory::graph::{self, build_full};
use vault_memory::llm::{Message, OpenAiCompatExtractor, Role};
use vault_memory::lock::RebuildLock;
use vault_memory::logging::{init_tracing, log_line};
use vault_memory::models::{GraphCache, Relation, Ticket, VectorPayload};
use vault_memory::prompt::{self, Prompt};
use vault_memory::queue;
use vault_memory::reflector;
use vault_memory::rerank::HttpReranker;
use vault_memory::retrieval::retrieve_with_context;
use vault_memory::source_chunk;
use vault_memory::vault;
use vault_memory::vector_store::SqliteVecStore;

#[derive(Subcommand)]
enum Command {
    /// Rebuild (or incrementally upsert) the vector, BM25 and graph indices
    Index {
        /// Incrementally upsert a single note instead of rebuilding everything
        #[arg(long)]
        note: Option<String>,
        /// Incrementally upsert a list of notes instead of rebuilding everything
        #[arg(long, num_args = 1..)]
        notes: Vec<String>,
    },
    /// Run cluster/staleness/orphan/TTL maintenance over the vault
    Reflect {
        /// Actually mutate the vault (mark stale, archive expired notes); default is report-only
        #[arg(long)]
        apply: bool,
        /// Print the report as JSON to stdout
        #[arg(long)]
        json: bool,
    },
    /// Stop-hook entrypoint: read a session ticket from stdin and enqueue it
    Enqueue {},
    /// Run the hybrid retrieval pipeline over a stdin JSON prompt and print a context block
    Retrieve {},
    /// Drain the extraction queue, turning tailed transcripts into vault writes
    Process {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

fn build_clients(config: &Config) -> Result<Clients> {
    let embedder = Box::new(FastEmbedEmbedder::new(config.embed_dim)?);
    let vector_store = Box::new(SqliteVecStore::open(&config.qdrant_path)?);
    let reranker = Box::new(HttpReranker::new(
        std::env::var("RERANK_API_KEY").unwrap_or_default(),
        config.rerank_base_url.clone(),
        config.rerank_model.clone(),
    ));
    let extractor = Box::new(OpenAiCompatExtractor::new(
        std::env::var("EXTRACT_API_KEY").unwrap_or_default(),
        config.extract_base_url.clone(),
        config.extract_model.clone(),
    ));

    Ok(Clients { embedder, reranker, extractor, vector_store })
}

async fn run_index(config: &Config, note: Option<String>, notes: Vec<String>) -> Result<()> {
    let _lock = RebuildLock::acquire_or_steal_stale(&config.qdrant_path, "index")?;
    let clients = build_clients(config)?;
    clients.vector_store.ensure_collection(config.embed_dim)?;

    let target_ids: Option<Vec<String>> = if let Some(n) = note {
        Some(vec![n])
    } else if !notes.is_empty() {
        Some(notes)
    } else {
        None
    };

    let all_paths = vault::list_notes(&config.vault_notes_dir)?;
    let paths: Vec<_> = match &target_ids {
        Some(ids) => all_paths
            .into_iter()
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| ids.iter().any(|id| id == s))
                    .unwrap_or(false)
            })
            .collect(),
        None => all_paths,
    };

    let mut batch = Vec::new();
    let mut bm25_inputs = Vec::new();
    let now = chrono::Utc::now().to_rfc3339();

    for path in &paths {
        let note = vault::parse_note(path)?;
        let vectors = clients.embedder.embed(&[note.embed_text.clone()], EmbedKind::Document).await?;

        let payload = VectorPayload {
            note_id: note.note_id.clone(),
            description: note.description.clone(),
            note_type: note.note_type.clone(),
            created: note.created.clone(),
            confidence: note.confidence.map(|c| c.as_str().to_string()),
            last_retrieved: now.clone(),
            updated_at: now.clone(),
        };
        batch.push((note.note_id.clone(), vectors[0].clone(), payload));
        bm25_inputs.push((
            note.note_id.clone(),
            note.embed_text.clone(),
            note.note_type.clone(),
            note.confidence.map(|c| c.as_str().to_string()),
        ));
    }

    clients.vector_store.upsert_batch(&batch)?;

    if target_ids.is_none() {
        let bm25 = Bm25Index::build(&bm25_inputs);
        bm25.persist(&config.bm25_index_path)?;

        let bodies: Vec<(String, String)> = paths
            .iter()
            .filter_map(|p| vault::parse_note(p).ok())
            .map(|n| (n.note_id, n.body))
            .collect();
        let cache = build_full(&bodies);
        graph::persist(&cache, &config.graph_cache_path)?;
    } else {
        // Incremental path: patch BM25 in place instead of a full rebuild,
        // and patch the graph cache too, but only if one already exists —
        // a missing cache means no full index has ever run, so there's
        // nothing sensible to patch yet.
        let mut bm25 = Bm25Index::load(&config.bm25_index_path)?.unwrap_or(Bm25Index { docs: vec![] });
        for (note_id, text, note_type, confidence) in &bm25_inputs {
            bm25.upsert(note_id, text, note_type, confidence.clone());
        }
        bm25.persist(&config.bm25_index_path)?;

        if let Some(mut cache) = graph::load(&config.graph_cache_path)? {
            let all_ids: HashSet<String> = vault::list_notes(&config.vault_notes_dir)?
                .iter()
                .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()))
                .collect();
            for path in &paths {
                if let Ok(n) = vault::parse_note(path) {
                    graph::patch_incremental(&mut cache, &n.note_id, &n.body, &all_ids);
                }
            }
            graph::persist(&cache, &config.graph_cache_path)?;
        }
    }

    log_line(&config.log_file, &format!("INDEXED {} notes", batch.len()));
    tracing::info!("indexed {} notes", batch.len());
    Ok(())
}

async fn run_reflect(config: &Config, apply: bool, json: bool) -> Result<()> {
    let _lock = RebuildLock::acquire_or_steal_stale(&config.qdrant_path, "reflect")?;
    let paths = vault::list_notes(&config.vault_notes_dir)?;
    if paths.len() < config.reflect_min_notes {
        tracing::info!("vault has fewer than REFLECT_MIN_NOTES notes, skipping reflection");
        return Ok(());
    }

    let clients = build_clients(config)?;
    let notes: Vec<_> = paths.iter().filter_map(|p| vault::parse_note(p).ok()).collect();
    let mut graph_cache = graph::load(&config.graph_cache_path)?.unwrap_or_default();
    let today = reflector::today();

    let mut orphan_ids = Vec::new();
    let mut stale_ids = Vec::new();
    let mut archived_ids = Vec::new();

    for note in &notes {
        if reflector::is_orphan(&graph_cache, &note.note_id) {
            orphan_ids.push(note.note_id.clone());
        }

        let last_retrieved = clients
            .vector_store
            .get_payload(&note.note_id)
            .ok()
            .flatten()
            .map(|p| p.last_retrieved)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| note.created.clone());

        if reflector::is_stale(&note.created, &last_retrieved, config.reflect_stale_days, today) {
            stale_ids.push(note.note_id.clone());
            if apply {
                vault::inject_frontmatter_field(
                    &config.vault_notes_dir.join(format!("{}.md", note.note_id)),
                    "stale",
                    "true",
                )?;
            }
        }

        if reflector::should_archive(&note.created, note.forget_after.as_deref(), &note.note_type, config, today) {
            archived_ids.push(note.note_id.clone());
            if apply {
                let src = config.vault_notes_dir.join(format!("{}.md", note.note_id));
                let dst = config.forget_archive_dir.join(format!("{}.md", note.note_id));
                std::fs::create_dir_all(&config.forget_archive_dir)?;
                std::fs::rename(src, dst)?;
                clients.vector_store.delete(&note.note_id)?;
                graph_cache.outbound.remove(&note.note_id);
                graph_cache.backlinks.remove(&note.note_id);
            }
        }
    }

    let mut vectors: HashMap<String, Vec<f32>> = HashMap::new();
    for note in &notes {
        if let Ok(Some(v)) = clients.vector_store.get_vector(&note.note_id) {
            vectors.insert(note.note_id.clone(), v);
        }
    }
    let note_ids: Vec<String> = vectors.keys().cloned().collect();
    let similarity = |a: &str, b: &str| -> f32 {
        match (vectors.get(a), vectors.get(b)) {
            (Some(va), Some(vb)) => reflector::cosine(va, vb),
            _ => 0.0,
        }
    };
    let clusters = reflector::detect_clusters(&note_ids, similarity, config.reflect_cluster_threshold);

    if apply {
        graph::persist(&graph_cache, &config.graph_cache_path)?;
    }

    if json {
        let report = serde_json::json!({
            "mode": if apply { "apply" } else { "report" },
            "orphans": orphan_ids,
            "stale": stale_ids,
            "archived": archived_ids,
            "clusters": clusters,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    log_line(
        &config.log_file,
        &format!(
            "REFLECT mode={} orphans={} stale={} archived={} clusters={}",
            if apply { "apply" } else { "report" },
            orphan_ids.len(),
            stale_ids.len(),
            archived_ids.len(),
            clusters.len()
        ),
    );
    tracing::info!(
        orphan_count = orphan_ids.len(),
        stale_count = stale_ids.len(),
        archived_count = archived_ids.len(),
        cluster_count = clusters.len(),
        apply,
        "reflection complete"
    );
    Ok(())
}

fn run_enqueue(config: &Config) -> Result<()> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw).context("reading ticket JSON from stdin")?;

    let data: serde_json::Value = if raw.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({}))
    };

    let session_id = data.get("session_id").and_then(|v| v.as_str()).unwrap_or("unknown");
    let transcript_path = data.get("transcript_path").and_then(|v| v.as_str()).unwrap_or("");
    let cwd = data.get("cwd").and_then(|v| v.as_str()).unwrap_or("");

    let outcome = queue::enqueue(
        &config.queue_dir,
        session_id,
        transcript_path,
        cwd,
        config.min_turns,
        config.min_new_turns,
    )?;

    use vault_memory::queue::EnqueueOutcome::*;
    let msg = match outcome {
        Enqueued { .. } => format!("ENQUEUED session={session_id}"),
        ReEnqueued { .. } => format!("RE-ENQUEUED session={session_id}"),
        SkippedNoTranscript => format!("ENQUEUE SKIP (no transcript) session={session_id}"),
        SkippedTooShort { turn_count } => format!("ENQUEUE SKIP (too short: {turn_count} turns) session={session_id}"),
        SkippedAlreadyProcessed { new_turns } => {
            format!("ENQUEUE SKIP (already processed, only +{new_turns} new turns) session={session_id}")
        }
    };
    log_line(&config.log_file, &msg);
    Ok(())
}

/// Retrieval's stdin contract: `{prompt, session_id, cwd}`, all optional and
/// defaulting to empty strings on parse failure so a malformed hook payload
/// degrades to an empty (no-op) query rather than crashing the hook.
fn read_retrieve_input() -> Result<(String, String, String)> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw).context("reading retrieval input from stdin")?;

    let data: serde_json::Value = if raw.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({}))
    };

    let prompt = data.get("prompt").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let session_id = data.get("session_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let cwd = data.get("cwd").and_then(|v| v.as_str()).unwrap_or("").to_string();
    Ok((prompt, session_id, cwd))
}

async fn run_retrieve(config: &Config) -> Result<()> {
    let (prompt, session_id, _cwd) = read_retrieve_input()?;
    let clients = build_clients(config)?;
    let bm25 = Bm25Index::load(&config.bm25_index_path)?.unwrap_or(Bm25Index { docs: vec![] });
    let graph_cache = graph::load(&config.graph_cache_path)?.unwrap_or_default();

    // Failures here are logged, never surfaced to stdout — the prompt
    // path must stay empty on error rather than print a stack trace.
    match retrieve_with_context(&clients, config, &bm25, &graph_cache, &prompt).await {
        Ok(block) => print!("{block}"),
        Err(e) => {
            log_line(&config.log_file, &format!("RETRIEVE ERROR session={session_id} err={e}"));
        }
    }
    Ok(())
}

/// Build a title->id lookup from every note currently on disk, for
/// resolving human-titled `[[...]]` links an LLM writes into fact content.
fn build_title_to_id(paths: &[std::path::PathBuf]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for path in paths {
        let Some(note_id) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let Ok(text) = std::fs::read_to_string(path) else { continue };
        if let Some(title) = vault::extract_title(&text) {
            map.insert(title.to_lowercase(), note_id.to_string());
        }
    }
    map
}

/// Re-embed and re-upsert a just-applied note in the background so
/// `run_process` doesn't block on the embedding model per fact; the caller
/// awaits every returned handle before exiting.
fn spawn_vector_upsert(
    clients: Arc<Clients>,
    vault_notes_dir: std::path::PathBuf,
    note_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let path = vault_notes_dir.join(format!("{note_id}.md"));
        let Ok(note) = vault::parse_note(&path) else { return };
        let Ok(vectors) = clients.embedder.embed(&[note.embed_text.clone()], EmbedKind::Document).await else {
            return;
        };
        let now = chrono::Utc::now().to_rfc3339();
        let payload = VectorPayload {
            note_id: note.note_id.clone(),
            description: note.description.clone(),
            note_type: note.note_type.clone(),
            created: note.created.clone(),
            confidence: note.confidence.map(|c| c.as_str().to_string()),
            last_retrieved: now.clone(),
            updated_at: now,
        };
        if let Err(e) = clients.vector_store.upsert_batch(&[(note.note_id.clone(), vectors[0].clone(), payload)]) {
            tracing::warn!("async vector upsert for {} failed: {e}", note.note_id);
        }
    })
}

/// Run the full extraction pipeline (spec steps 1-8) for one queued
/// session: tail + sanitize the transcript, pre-query related notes,
/// extract, optionally validate, then normalize/dedup/apply/graph-patch
/// each surviving fact. Returns the number of facts actually applied.
async fn process_one_ticket(
    clients: &Arc<Clients>,
    config: &Config,
    ticket: &Ticket,
    graph_cache: &mut GraphCache,
    upserts: &mut Vec<tokio::task::JoinHandle<()>>,
) -> Result<usize> {
    let transcript_path = std::path::Path::new(&ticket.transcript_path);
    let Ok(raw) = std::fs::read_to_string(transcript_path) else {
        return Ok(0);
    };

    let tailed = extraction::tail_transcript(&raw);
    let truncated = extraction::truncate_code_blocks(&tailed, config.max_code_block_chars);
    let cleaned = extraction::strip_sentinel_tags(&truncated);
    if cleaned.trim().is_empty() {
        return Ok(0);
    }

    // Step 3: embed a short prefix of the transcript and pull the existing
    // notes already close to it, so the extraction prompt has context.
    let pre_query_text: String = cleaned.chars().take(1000).collect();
    let pre_query_vec = clients.embedder.embed(&[pre_query_text], EmbedKind::Query).await?;
    let related_hits = clients.vector_store.query(&pre_query_vec[0], 5).unwrap_or_default();
    let related_context = related_hits
        .iter()
        .filter(|h| h.score >= 0.50)
        .filter_map(|h| vault::parse_note(&config.vault_notes_dir.join(format!("{}.md", h.note_id))).ok())
        .map(|n| format!("### {}\n{}", n.note_id, n.body))
        .collect::<Vec<_>>()
        .join("\n\n");

    // Step 4: render the existing-notes summary.
    let paths = vault::list_notes(&config.vault_notes_dir)?;
    let existing_notes: Vec<(String, String)> = paths
        .iter()
        .filter_map(|p| vault::parse_note(p).ok())
        .map(|n| (n.note_id, n.description))
        .collect();
    let existing_notes_summary = extraction::format_existing_notes(&existing_notes);

    // Step 5: extraction.
    let registry = prompt::templates();
    let extraction_prompt = registry.render(
        &Prompt::Extraction.to_string(),
        &serde_json::json!({
            "existing_notes": existing_notes_summary,
            "related_context": related_context,
            "transcript": cleaned,
        }),
    )?;
    let response = clients.extractor.complete(&[Message::new(Role::User, extraction_prompt)]).await?;
    let Ok(mut facts) = extraction::parse_extracted_facts(&response) else {
        return Ok(0);
    };
    if facts.is_empty() {
        return Ok(0);
    }

    // Step 6: validation pass, fails open to the unvalidated facts.
    if config.validation_enabled {
        let facts_json = serde_json::to_string(&facts)?;
        let conversation: String = {
            let rev: String = cleaned.chars().rev().take(5000).collect();
            rev.chars().rev().collect()
        };
        let validation_prompt = registry.render(
            &Prompt::Validation.to_string(),
            &serde_json::json!({"facts": facts_json, "conversation": conversation}),
        )?;
        match clients.extractor.complete(&[Message::new(Role::User, validation_prompt)]).await {
            Ok(validated_raw) => match extraction::parse_validated_facts(&validated_raw) {
                Ok(validated) => facts = validated,
                Err(e) => tracing::warn!("validation parse failed, keeping unvalidated facts: {e}"),
            },
            Err(e) => tracing::warn!("validation call failed, keeping unvalidated facts: {e}"),
        }
    }

    if facts.is_empty() {
        return Ok(0);
    }

    // Step 7: normalize, dedup, apply, and patch each surviving fact.
    let title_to_id = build_title_to_id(&paths);
    let mut valid_ids: HashSet<String> = paths
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()))
        .collect();

    let mut applied_count = 0usize;
    for raw_fact in &facts {
        let mut normalized = extraction::normalize_fact(raw_fact);

        if normalized.relation == Relation::New {
            let content_prefix: String = normalized.content.chars().take(500).collect();
            if let Ok(candidate_vec) = extraction::embed_fact_content(clients, &content_prefix).await {
                if let Ok(top) = clients.vector_store.query(&candidate_vec, 1) {
                    if let Some(hit) = top.first() {
                        if hit.score >= config.dedup_threshold && valid_ids.contains(&hit.note_id) {
                            normalized.relation = Relation::Extends;
                            normalized.target = Some(hit.note_id.clone());
                        }
                    }
                }
            }
        }

        let is_extends = normalized.relation == Relation::Extends;
        let relation_label = normalized.relation.to_string();

        let applied_id = match extraction::apply_fact(&config.vault_notes_dir, &normalized, &valid_ids, &title_to_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("applying fact {} failed: {e}", normalized.note_id);
                continue;
            }
        };
        valid_ids.insert(applied_id.clone());
        applied_count += 1;

        if config.source_chunks_enabled {
            if let Err(e) = source_chunk::write_chunk(
                &config.source_chunks_dir,
                &applied_id,
                &cleaned,
                config.source_chunk_max_chars,
                &relation_label,
                is_extends,
            ) {
                tracing::warn!("writing source chunk for {applied_id} failed: {e}");
            }
        }

        if let Ok(applied_note) = vault::parse_note(&config.vault_notes_dir.join(format!("{applied_id}.md"))) {
            graph::patch_incremental(graph_cache, &applied_id, &applied_note.body, &valid_ids);
        }

        upserts.push(spawn_vector_upsert(Arc::clone(clients), config.vault_notes_dir.clone(), applied_id));
    }

    Ok(applied_count)
}

async fn run_process(config: &Config) -> Result<()> {
    let _lock = RebuildLock::acquire_or_steal_stale(&config.qdrant_path, "process")?;
    if !config.vault_notes_dir.exists() {
        tracing::warn!("vault notes dir {} does not exist, skipping processing", config.vault_notes_dir.display());
        return Ok(());
    }

    let clients = Arc::new(build_clients(config)?);
    clients.vector_store.ensure_collection(config.embed_dim)?;

    let tickets = queue::pending_tickets(&config.queue_dir)?;
    let mut graph_cache = graph::load(&config.graph_cache_path)?.unwrap_or_default();
    let mut upserts = Vec::new();
    let mut applied_count = 0usize;

    for ticket in &tickets {
        match process_one_ticket(&clients, config, ticket, &mut graph_cache, &mut upserts).await {
            Ok(n) => applied_count += n,
            Err(e) => {
                tracing::warn!("processing ticket {} failed: {e}", ticket.session_id);
                log_line(&config.log_file, &format!("PROCESS ERROR session={} err={e}", ticket.session_id));
            }
        }
        queue::mark_processed(&config.queue_dir, ticket)?;
    }

    graph::persist(&graph_cache, &config.graph_cache_path)?;

    for handle in upserts {
        let _ = handle.await;
    }

    log_line(&config.log_file, &format!("PROCESSED {} tickets, {applied_count} facts applied", tickets.len()));
    tracing::info!(tickets = tickets.len(), facts_applied = applied_count, "processing complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Index { note, notes } => run_index(&config, note, notes).await,
        Command::Reflect { apply, json } => run_reflect(&config, apply, json).await,
        Command::Enqueue {} => run_enqueue(&config),
        Command::Retrieve {} => run_retrieve(&config).await,
        Command::Process {} => run_process(&config).await,
    }
}
