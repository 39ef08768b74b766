//! End-to-end exercise of the indexing + retrieval pipeline against a
//! throwaway vault directory, in the style of the teacher's own
//! `tests/integration_test.rs` temp-dir fixture, swapping the teacher's
//! `axum::Router` + real sqlite-vec db for this crate's `Clients` bundle
//! built from the in-memory test stubs.

use std::collections::HashMap;
use std::fs;

use vault_memory::bm25::Bm25Index;
use vault_memory::clients::Clients;
use vault_memory::config::Config;
use vault_memory::embed::{EmbedKind, Embedder, StubEmbedder};
use vault_memory::graph::build_full;
use vault_memory::llm::StubExtractor;
use vault_memory::models::VectorPayload;
use vault_memory::rerank::NoopReranker;
use vault_memory::retrieval::{retrieve, retrieve_with_context};
use vault_memory::source_chunk;
use vault_memory::vault;
use vault_memory::vector_store::MemoryVectorStore;

fn test_config(vault_dir: &std::path::Path) -> Config {
    Config {
        vault_notes_dir: vault_dir.to_path_buf(),
        source_chunks_dir: vault_dir.join("_sources"),
        forget_archive_dir: vault_dir.join("_archived"),
        qdrant_path: vault_dir.join("qdrant"),
        queue_dir: vault_dir.join("queue"),
        bm25_index_path: vault_dir.join("bm25_index.json"),
        graph_cache_path: vault_dir.join("graph_cache.json"),
        log_file: vault_dir.join("vault_memory.log"),

        embed_model: "stub".to_string(),
        embed_dim: 64,
        embed_batch_size: 128,
        rerank_model: "stub".to_string(),
        extract_model: "stub".to_string(),
        extract_base_url: "http://localhost".to_string(),
        rerank_base_url: "http://localhost".to_string(),

        retrieve_score_threshold: 0.0,
        retrieve_top_k: 3,
        min_query_length: 5,
        bm25_enabled: true,
        rrf_k: 60,
        bm25_top_k: 10,
        vector_top_k: 10,
        rrf_final_top_k: 5,
        rerank_enabled: false,
        rerank_candidates: 10,

        confidence_boost: 1.2,
        decay_enabled: false,
        decay_half_life_days: 90.0,
        decay_floor: 0.3,

        max_secondary: 5,
        max_backlinks_per_note: 3,
        bfs_depth: 2,

        dedup_threshold: 0.85,
        min_turns: 5,
        min_new_turns: 10,
        max_code_block_chars: 500,
        validation_enabled: false,

        source_chunks_enabled: true,
        source_chunk_max_chars: 2000,
        source_inject_max_chars: 800,

        reflect_min_notes: 30,
        reflect_cluster_threshold: 0.82,
        reflect_stale_days: 180,
        forget_default_ttl_days: HashMap::new(),
    }
}

fn write_note(dir: &std::path::Path, id: &str, contents: &str) {
    fs::write(dir.join(format!("{id}.md")), contents).unwrap();
}

/// Indexes a two-note vault (one linking to the other) through the same
/// parse -> embed -> upsert -> bm25-build -> graph-build path `run_index`
/// drives, then queries it end to end.
#[tokio::test]
async fn indexes_and_retrieves_across_a_small_vault() {
    let dir = tempfile::tempdir().unwrap();
    let vault_dir = dir.path().join("notes");
    fs::create_dir_all(&vault_dir).unwrap();

    write_note(
        &vault_dir,
        "rust-ownership",
        "---\n\
         description: Rust's ownership model prevents use-after-free bugs\n\
         type: concept\n\
         confidence: confirmed\n\
         created: 2026-01-01\n\
         ---\n\
         # Rust Ownership\n\n\
         Every value has a single owner; when the owner goes out of scope the value is dropped. See [[rust-borrowing]].\n",
    );
    write_note(
        &vault_dir,
        "rust-borrowing",
        "---\n\
         description: Borrowing lets you reference data without taking ownership\n\
         type: concept\n\
         confidence: experimental\n\
         created: 2026-01-02\n\
         ---\n\
         # Rust Borrowing\n\n\
         References must not outlive the data they point to.\n",
    );
    write_note(
        &vault_dir,
        "weekend-hike",
        "---\n\
         description: Notes from a weekend hiking trip\n\
         type: journal\n\
         created: 2026-01-03\n\
         ---\n\
         # Weekend Hike\n\n\
         Climbed the ridge trail with friends, unrelated to any code.\n",
    );

    let config = test_config(&vault_dir);
    let embedder = StubEmbedder::new(config.embed_dim);

    let paths = vault::list_notes(&config.vault_notes_dir).unwrap();
    assert_eq!(paths.len(), 3);

    let vector_store = MemoryVectorStore::new();
    let mut bm25_inputs = Vec::new();
    let mut bodies = Vec::new();
    let now = "2026-01-10T00:00:00Z".to_string();

    for path in &paths {
        let note = vault::parse_note(path).unwrap();
        let vectors = embedder.embed(&[note.embed_text.clone()], EmbedKind::Document).await.unwrap();

        let payload = VectorPayload {
            note_id: note.note_id.clone(),
            description: note.description.clone(),
            note_type: note.note_type.clone(),
            created: note.created.clone(),
            confidence: note.confidence.map(|c| c.as_str().to_string()),
            last_retrieved: now.clone(),
            updated_at: now.clone(),
        };
        vector_store.upsert_batch(&[(note.note_id.clone(), vectors[0].clone(), payload)]).unwrap();
        bm25_inputs.push((
            note.note_id.clone(),
            note.embed_text.clone(),
            note.note_type.clone(),
            note.confidence.map(|c| c.as_str().to_string()),
        ));
        bodies.push((note.note_id.clone(), note.body.clone()));
    }

    let bm25 = Bm25Index::build(&bm25_inputs);
    let graph = build_full(&bodies);
    assert_eq!(graph.outbound.get("rust-ownership").unwrap(), &vec!["rust-borrowing".to_string()]);
    assert_eq!(graph.backlinks.get("rust-borrowing").unwrap(), &vec!["rust-ownership".to_string()]);

    let clients = Clients {
        embedder: Box::new(embedder),
        reranker: Box::new(NoopReranker),
        extractor: Box::new(StubExtractor::new(vec![])),
        vector_store: Box::new(vector_store),
    };

    let results = retrieve(&clients, &config, &bm25, &graph, "tell me about rust ownership and borrowing").await.unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].note_id, "rust-ownership");
    assert!(results.iter().all(|c| c.note_id != "weekend-hike" || c.rrf_score < results[0].rrf_score));
}

/// Exercises steps 7-10 on top of the same small vault: graph expansion
/// should surface the linked-but-not-primary note, the top primary's
/// source chunk should get inlined, and the block should carry both
/// section headers `retrieve` alone never produces.
#[tokio::test]
async fn retrieve_with_context_expands_graph_and_injects_source_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let vault_dir = dir.path().join("notes");
    fs::create_dir_all(&vault_dir).unwrap();

    write_note(
        &vault_dir,
        "rust-ownership",
        "---\n\
         description: Rust's ownership model prevents use-after-free bugs\n\
         type: concept\n\
         confidence: confirmed\n\
         created: 2026-01-01\n\
         ---\n\
         # Rust Ownership\n\n\
         Every value has a single owner; when the owner goes out of scope the value is dropped. See [[rust-borrowing]].\n",
    );
    write_note(
        &vault_dir,
        "rust-borrowing",
        "---\n\
         description: Borrowing lets you reference data without taking ownership\n\
         type: concept\n\
         confidence: experimental\n\
         created: 2026-01-02\n\
         ---\n\
         # Rust Borrowing\n\n\
         References must not outlive the data they point to.\n",
    );

    let config = test_config(&vault_dir);
    let embedder = StubEmbedder::new(config.embed_dim);

    let paths = vault::list_notes(&config.vault_notes_dir).unwrap();
    let vector_store = MemoryVectorStore::new();
    let mut bm25_inputs = Vec::new();
    let mut bodies = Vec::new();
    let now = "2026-01-10T00:00:00Z".to_string();

    for path in &paths {
        let note = vault::parse_note(path).unwrap();
        let vectors = embedder.embed(&[note.embed_text.clone()], EmbedKind::Document).await.unwrap();

        let payload = VectorPayload {
            note_id: note.note_id.clone(),
            description: note.description.clone(),
            note_type: note.note_type.clone(),
            created: note.created.clone(),
            confidence: note.confidence.map(|c| c.as_str().to_string()),
            last_retrieved: now.clone(),
            updated_at: now.clone(),
        };
        vector_store.upsert_batch(&[(note.note_id.clone(), vectors[0].clone(), payload)]).unwrap();
        bm25_inputs.push((
            note.note_id.clone(),
            note.embed_text.clone(),
            note.note_type.clone(),
            note.confidence.map(|c| c.as_str().to_string()),
        ));
        bodies.push((note.note_id.clone(), note.body.clone()));
    }

    let bm25 = Bm25Index::build(&bm25_inputs);
    let graph = build_full(&bodies);

    source_chunk::write_chunk(
        &config.source_chunks_dir,
        "rust-ownership",
        "user: what's the deal with use-after-free in rust?\nassistant: ownership prevents it.",
        config.source_chunk_max_chars,
        "new",
        false,
    )
    .unwrap();

    let clients = Clients {
        embedder: Box::new(embedder),
        reranker: Box::new(NoopReranker),
        extractor: Box::new(StubExtractor::new(vec![])),
        vector_store: Box::new(vector_store),
    };

    let block = retrieve_with_context(&clients, &config, &bm25, &graph, "tell me about rust ownership and borrowing")
        .await
        .unwrap();

    assert!(block.contains("=== Relevant vault notes ==="));
    assert!(block.contains("=== Connected notes (graph) ==="));
    assert!(block.contains("[[rust-ownership]]"));
    assert!(block.contains("[[rust-borrowing]]"));
    assert!(block.contains("use-after-free in rust"));

    let refreshed = clients.vector_store.get_payload("rust-ownership").unwrap().unwrap();
    assert_ne!(refreshed.last_retrieved, now);
}

#[tokio::test]
async fn short_query_returns_no_results() {
    let dir = tempfile::tempdir().unwrap();
    let vault_dir = dir.path().join("notes");
    fs::create_dir_all(&vault_dir).unwrap();
    let mut config = test_config(&vault_dir);
    config.min_query_length = 20;

    let clients = Clients {
        embedder: Box::new(StubEmbedder::new(config.embed_dim)),
        reranker: Box::new(NoopReranker),
        extractor: Box::new(StubExtractor::new(vec![])),
        vector_store: Box::new(MemoryVectorStore::new()),
    };
    let bm25 = Bm25Index { docs: vec![] };
    let graph = Default::default();

    let results = retrieve(&clients, &config, &bm25, &graph, "too short").await.unwrap();
    assert!(results.is_empty());
}
