//! Immutable configuration, built once at process entry.
//!
//! Values come from environment variables, falling back to the literal
//! defaults from the original `config.example.py`. Configuration *file*
//! loading is out of scope for this crate (an external collaborator's
//! responsibility) so there are only two tiers here, not three — env
//! overrides win over the built-in defaults below, full stop.

use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    // Paths
    pub vault_notes_dir: PathBuf,
    pub source_chunks_dir: PathBuf,
    pub forget_archive_dir: PathBuf,
    pub qdrant_path: PathBuf,
    pub queue_dir: PathBuf,
    pub bm25_index_path: PathBuf,
    pub graph_cache_path: PathBuf,
    pub log_file: PathBuf,

    // Model selection
    pub embed_model: String,
    pub embed_dim: usize,
    pub embed_batch_size: usize,
    pub rerank_model: String,
    pub extract_model: String,
    pub extract_base_url: String,
    pub rerank_base_url: String,

    // Retrieval
    pub retrieve_score_threshold: f32,
    pub retrieve_top_k: usize,
    pub min_query_length: usize,
    pub bm25_enabled: bool,
    pub rrf_k: u32,
    pub bm25_top_k: usize,
    pub vector_top_k: usize,
    pub rrf_final_top_k: usize,
    pub rerank_enabled: bool,
    pub rerank_candidates: usize,

    // Scoring
    pub confidence_boost: f32,
    pub decay_enabled: bool,
    pub decay_half_life_days: f64,
    pub decay_floor: f32,

    // Graph
    pub max_secondary: usize,
    pub max_backlinks_per_note: usize,
    pub bfs_depth: usize,

    // Extraction
    pub dedup_threshold: f32,
    pub min_turns: u64,
    pub min_new_turns: u64,
    pub max_code_block_chars: usize,
    pub validation_enabled: bool,

    // Sources
    pub source_chunks_enabled: bool,
    pub source_chunk_max_chars: usize,
    pub source_inject_max_chars: usize,

    // Reflector
    pub reflect_min_notes: usize,
    pub reflect_cluster_threshold: f32,
    pub reflect_stale_days: i64,
    pub forget_default_ttl_days: HashMap<String, i64>,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_string(key, default))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl Config {
    /// Build configuration from environment variables, with built-in
    /// defaults matching the original `config.example.py`.
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
        let default_notes = format!("{home}/notes");

        let vault_notes_dir = env_path("VAULT_NOTES_DIR", &default_notes);
        let source_chunks_dir = env_path(
            "SOURCE_CHUNKS_DIR",
            &vault_notes_dir.join("_sources").display().to_string(),
        );
        let forget_archive_dir = env_path(
            "FORGET_ARCHIVE_DIR",
            &vault_notes_dir.join("_archived").display().to_string(),
        );

        let bfs_depth = env_parse("BFS_DEPTH", 2usize);
        let bfs_depth = if bfs_depth > 2 {
            tracing::warn!(
                "BFS_DEPTH={} exceeds the supported round-robin construction (max 2); clamping",
                bfs_depth
            );
            2
        } else {
            bfs_depth
        };

        Config {
            vault_notes_dir,
            source_chunks_dir,
            forget_archive_dir,
            qdrant_path: env_path("QDRANT_PATH", &format!("{home}/.vault/qdrant")),
            queue_dir: env_path("QUEUE_DIR", &format!("{home}/.vault/queue")),
            bm25_index_path: env_path("BM25_INDEX_PATH", &format!("{home}/.vault/vault_bm25_index.json")),
            graph_cache_path: env_path("GRAPH_CACHE_PATH", &format!("{home}/.vault/vault_graph_cache.json")),
            log_file: env_path("LOG_FILE", &format!("{home}/.vault/vault_memory.log")),

            embed_model: env_string("EMBED_MODEL", "BGESmallENV15"),
            embed_dim: env_parse("EMBED_DIM", 384usize),
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", 128usize),
            rerank_model: env_string("RERANK_MODEL", "rerank-2"),
            extract_model: env_string("EXTRACT_MODEL", "accounts/fireworks/models/kimi-k2p5"),
            extract_base_url: env_string("EXTRACT_BASE_URL", "https://api.fireworks.ai/inference/v1"),
            rerank_base_url: env_string("RERANK_BASE_URL", "https://api.voyageai.com/v1/rerank"),

            retrieve_score_threshold: env_parse("RETRIEVE_SCORE_THRESHOLD", 0.60),
            retrieve_top_k: env_parse("RETRIEVE_TOP_K", 3usize),
            min_query_length: env_parse("MIN_QUERY_LENGTH", 20usize),
            bm25_enabled: env_bool("BM25_ENABLED", true),
            rrf_k: env_parse("RRF_K", 60u32),
            bm25_top_k: env_parse("BM25_TOP_K", 10usize),
            vector_top_k: env_parse("VECTOR_TOP_K", 10usize),
            rrf_final_top_k: env_parse("RRF_FINAL_TOP_K", 3usize),
            rerank_enabled: env_bool("RERANK_ENABLED", true),
            rerank_candidates: env_parse("RERANK_CANDIDATES", 10usize),

            confidence_boost: env_parse("CONFIDENCE_BOOST", 1.2),
            decay_enabled: env_bool("DECAY_ENABLED", true),
            decay_half_life_days: env_parse("DECAY_HALF_LIFE_DAYS", 90.0),
            decay_floor: env_parse("DECAY_FLOOR", 0.3),

            max_secondary: env_parse("MAX_SECONDARY", 5usize),
            max_backlinks_per_note: env_parse("MAX_BACKLINKS_PER_NOTE", 3usize),
            bfs_depth,

            dedup_threshold: env_parse("DEDUP_THRESHOLD", 0.85),
            min_turns: env_parse("MIN_TURNS", 5u64),
            min_new_turns: env_parse("MIN_NEW_TURNS", 10u64),
            max_code_block_chars: env_parse("MAX_CODE_BLOCK_CHARS", 500usize),
            validation_enabled: env_bool("VALIDATION_ENABLED", true),

            source_chunks_enabled: env_bool("SOURCE_CHUNKS_ENABLED", true),
            source_chunk_max_chars: env_parse("SOURCE_CHUNK_MAX_CHARS", 2000usize),
            source_inject_max_chars: env_parse("SOURCE_INJECT_MAX_CHARS", 800usize),

            reflect_min_notes: env_parse("REFLECT_MIN_NOTES", 30usize),
            reflect_cluster_threshold: env_parse("REFLECT_CLUSTER_THRESHOLD", 0.82),
            reflect_stale_days: env_parse("REFLECT_STALE_DAYS", 180i64),
            forget_default_ttl_days: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_match_spec() {
        let cfg = Config::from_env();
        assert_eq!(cfg.retrieve_score_threshold, 0.60);
        assert_eq!(cfg.dedup_threshold, 0.85);
        assert_eq!(cfg.rrf_k, 60);
        assert_eq!(cfg.confidence_boost, 1.2);
        assert_eq!(cfg.decay_half_life_days, 90.0);
        assert_eq!(cfg.decay_floor, 0.3);
        assert_eq!(cfg.reflect_min_notes, 30);
        assert_eq!(cfg.reflect_cluster_threshold, 0.82);
        assert_eq!(cfg.reflect_stale_days, 180);
    }

    #[test]
    #[serial]
    fn bfs_depth_clamped_above_two() {
        unsafe { std::env::set_var("BFS_DEPTH", "5") };
        let cfg = Config::from_env();
        assert_eq!(cfg.bfs_depth, 2);
        unsafe { std::env::remove_var("BFS_DEPTH") };
    }
}
