//! The vector index. `SqliteVecStore` mirrors the teacher's `db.rs`
//! pattern of registering `sqlite-vec` via `sqlite3_auto_extension` and
//! upserting into a `vec0` virtual table with an insert-then-fallback-to-
//! update pattern (`sqlite-vec` doesn't support `INSERT OR REPLACE` against
//! virtual tables). Vectors are L2-normalized by the embedder before they
//! reach this module, so Euclidean distance over them ranks the same as
//! cosine similarity, letting us stick to `vec0`'s native L2 distance.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;
use zerocopy::IntoBytes;

use crate::models::{ScoredNote, VectorPayload};

const NOTE_NS: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// The same UUIDv5 scheme the original used to turn a note id into a
/// stable point id: `uuid5(NAMESPACE_DNS, note_id)`.
pub fn point_id(note_id: &str) -> Uuid {
    Uuid::new_v5(&NOTE_NS, note_id.as_bytes())
}

pub trait VectorStore: Send + Sync {
    fn ensure_collection(&self, dim: usize) -> Result<()>;
    fn upsert_batch(&self, vectors: &[(String, Vec<f32>, VectorPayload)]) -> Result<()>;
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredNote>>;
    /// Score only the given candidate ids against `vector`, for graph-
    /// expansion scoring (spec's restricted k-NN over an allow-list).
    /// Candidates absent from the store are simply omitted, not padded.
    fn filtered_query(&self, vector: &[f32], candidate_ids: &[String]) -> Result<Vec<ScoredNote>>;
    fn get_payload(&self, note_id: &str) -> Result<Option<VectorPayload>>;
    fn get_vector(&self, note_id: &str) -> Result<Option<Vec<f32>>>;
    fn set_last_retrieved(&self, note_id: &str, ts: &str) -> Result<()>;
    fn delete(&self, note_id: &str) -> Result<()>;
}

pub struct SqliteVecStore {
    conn: Connection,
}

impl SqliteVecStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut i8,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> i32,
            >(sqlite_vec::sqlite3_vec_init as *const ())));
        }

        let conn = Connection::open(path.join("vector.db"))
            .with_context(|| format!("opening vector store at {}", path.display()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS note_payload (
                note_id TEXT PRIMARY KEY,
                description TEXT,
                type TEXT,
                created TEXT,
                confidence TEXT,
                last_retrieved TEXT,
                updated_at TEXT
            )",
            [],
        )?;

        Ok(Self { conn })
    }
}

impl VectorStore for SqliteVecStore {
    fn ensure_collection(&self, dim: usize) -> Result<()> {
        self.conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vec_items USING vec0(
                    note_id TEXT PRIMARY KEY,
                    embedding float[{dim}]
                )"
            ),
            [],
        )?;
        Ok(())
    }

    fn upsert_batch(&self, vectors: &[(String, Vec<f32>, VectorPayload)]) -> Result<()> {
        let mut insert_stmt = self
            .conn
            .prepare("INSERT INTO vec_items(note_id, embedding) VALUES (?, ?)")?;
        let mut update_stmt = self
            .conn
            .prepare("UPDATE vec_items SET embedding = ? WHERE note_id = ?")?;
        let mut payload_stmt = self.conn.prepare(
            "REPLACE INTO note_payload(note_id, description, type, created, confidence, last_retrieved, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;

        for (note_id, vector, payload) in vectors {
            // sqlite-vec virtual tables don't support REPLACE/upsert, so
            // insert first and fall back to an update on conflict.
            if insert_stmt
                .execute(rusqlite::params![note_id, vector.as_bytes()])
                .is_err()
            {
                update_stmt.execute(rusqlite::params![vector.as_bytes(), note_id])?;
            }

            payload_stmt.execute(rusqlite::params![
                note_id,
                payload.description,
                payload.note_type,
                payload.created,
                payload.confidence,
                payload.last_retrieved,
                payload.updated_at,
            ])?;
        }

        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.note_id, v.distance,
                    p.description, p.type, p.created, p.confidence, p.last_retrieved, p.updated_at
             FROM (
                SELECT note_id, distance FROM vec_items
                WHERE embedding MATCH ? AND k = ?
                ORDER BY distance
             ) v
             LEFT JOIN note_payload p ON p.note_id = v.note_id",
        )?;

        let rows = stmt.query_map(rusqlite::params![vector.as_bytes(), top_k as i64], |row| {
            let note_id: String = row.get(0)?;
            let distance: f64 = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let note_type: Option<String> = row.get(3)?;
            let created: Option<String> = row.get(4)?;
            let confidence: Option<String> = row.get(5)?;
            let last_retrieved: Option<String> = row.get(6)?;
            let updated_at: Option<String> = row.get(7)?;

            let payload = description.map(|description| VectorPayload {
                note_id: note_id.clone(),
                description,
                note_type: note_type.unwrap_or_default(),
                created: created.unwrap_or_default(),
                confidence,
                last_retrieved: last_retrieved.unwrap_or_default(),
                updated_at: updated_at.unwrap_or_default(),
            });

            // L2 distance over unit vectors: cos_sim = 1 - d^2/2.
            let score = 1.0 - (distance as f32 * distance as f32) / 2.0;
            Ok(ScoredNote { note_id, payload, score })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collecting vector query rows")
    }

    fn filtered_query(&self, vector: &[f32], candidate_ids: &[String]) -> Result<Vec<ScoredNote>> {
        let mut embedding_stmt = self.conn.prepare("SELECT embedding FROM vec_items WHERE note_id = ?")?;
        let mut payload_stmt = self.conn.prepare(
            "SELECT description, type, created, confidence, last_retrieved, updated_at
             FROM note_payload WHERE note_id = ?",
        )?;

        let mut out = Vec::new();
        for note_id in candidate_ids {
            let embedding: Option<Vec<u8>> = embedding_stmt
                .query_row(rusqlite::params![note_id], |row| row.get(0))
                .optional()?;
            let Some(bytes) = embedding else { continue };
            let candidate_vec = decode_embedding(&bytes);
            let score = cosine(vector, &candidate_vec);

            let payload = payload_stmt
                .query_row(rusqlite::params![note_id], |row| {
                    Ok(VectorPayload {
                        note_id: note_id.clone(),
                        description: row.get(0)?,
                        note_type: row.get(1)?,
                        created: row.get(2)?,
                        confidence: row.get(3)?,
                        last_retrieved: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                })
                .optional()?;

            out.push(ScoredNote { note_id: note_id.clone(), payload, score });
        }

        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        Ok(out)
    }

    fn get_payload(&self, note_id: &str) -> Result<Option<VectorPayload>> {
        self.conn
            .query_row(
                "SELECT description, type, created, confidence, last_retrieved, updated_at
                 FROM note_payload WHERE note_id = ?",
                rusqlite::params![note_id],
                |row| {
                    Ok(VectorPayload {
                        note_id: note_id.to_string(),
                        description: row.get(0)?,
                        note_type: row.get(1)?,
                        created: row.get(2)?,
                        confidence: row.get(3)?,
                        last_retrieved: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("reading note payload")
    }

    fn get_vector(&self, note_id: &str) -> Result<Option<Vec<f32>>> {
        let embedding: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM vec_items WHERE note_id = ?",
                rusqlite::params![note_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(embedding.map(|bytes| decode_embedding(&bytes)))
    }

    fn set_last_retrieved(&self, note_id: &str, ts: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE note_payload SET last_retrieved = ? WHERE note_id = ?",
            rusqlite::params![ts, note_id],
        )?;
        Ok(())
    }

    fn delete(&self, note_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM vec_items WHERE note_id = ?", rusqlite::params![note_id])?;
        self.conn
            .execute("DELETE FROM note_payload WHERE note_id = ?", rusqlite::params![note_id])?;
        Ok(())
    }
}

/// Raw embedding blobs are written via `zerocopy::IntoBytes` (native-endian
/// `f32` bytes); decode them back the same way on the rare paths that read
/// a single stored vector directly instead of going through `vec0 MATCH`.
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Linear-scan in-memory store for tests: no sqlite, no extension
/// loading, same trait surface.
pub struct MemoryVectorStore {
    inner: std::sync::Mutex<Vec<(String, Vec<f32>, VectorPayload)>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self { inner: std::sync::Mutex::new(Vec::new()) }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStore for MemoryVectorStore {
    fn ensure_collection(&self, _dim: usize) -> Result<()> {
        Ok(())
    }

    fn upsert_batch(&self, vectors: &[(String, Vec<f32>, VectorPayload)]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for (note_id, vector, payload) in vectors {
            inner.retain(|(id, _, _)| id != note_id);
            inner.push((note_id.clone(), vector.clone(), payload.clone()));
        }
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredNote>> {
        let inner = self.inner.lock().unwrap();
        let mut scored: Vec<ScoredNote> = inner
            .iter()
            .map(|(note_id, v, payload)| {
                let score = cosine(vector, v);
                ScoredNote {
                    note_id: note_id.clone(),
                    payload: Some(payload.clone()),
                    score,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(top_k);
        Ok(scored)
    }

    fn filtered_query(&self, vector: &[f32], candidate_ids: &[String]) -> Result<Vec<ScoredNote>> {
        let inner = self.inner.lock().unwrap();
        let mut scored: Vec<ScoredNote> = inner
            .iter()
            .filter(|(id, _, _)| candidate_ids.contains(id))
            .map(|(note_id, v, payload)| ScoredNote {
                note_id: note_id.clone(),
                payload: Some(payload.clone()),
                score: cosine(vector, v),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        Ok(scored)
    }

    fn get_payload(&self, note_id: &str) -> Result<Option<VectorPayload>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.iter().find(|(id, _, _)| id == note_id).map(|(_, _, p)| p.clone()))
    }

    fn get_vector(&self, note_id: &str) -> Result<Option<Vec<f32>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.iter().find(|(id, _, _)| id == note_id).map(|(_, v, _)| v.clone()))
    }

    fn set_last_retrieved(&self, note_id: &str, ts: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, _, payload)) = inner.iter_mut().find(|(id, _, _)| id == note_id) {
            payload.last_retrieved = ts.to_string();
        }
        Ok(())
    }

    fn delete(&self, note_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|(id, _, _)| id != note_id);
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(note_id: &str) -> VectorPayload {
        VectorPayload {
            note_id: note_id.to_string(),
            description: "d".to_string(),
            note_type: "concept".to_string(),
            created: "2026-01-01".to_string(),
            confidence: None,
            last_retrieved: "2026-01-01".to_string(),
            updated_at: "2026-01-01".to_string(),
        }
    }

    #[test]
    fn point_id_is_stable() {
        assert_eq!(point_id("note-a"), point_id("note-a"));
        assert_ne!(point_id("note-a"), point_id("note-b"));
    }

    #[test]
    fn memory_store_ranks_by_cosine() {
        let store = MemoryVectorStore::new();
        store
            .upsert_batch(&[
                ("a".to_string(), vec![1.0, 0.0], payload("a")),
                ("b".to_string(), vec![0.0, 1.0], payload("b")),
            ])
            .unwrap();

        let results = store.query(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].note_id, "a");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn memory_store_upsert_replaces() {
        let store = MemoryVectorStore::new();
        store.upsert_batch(&[("a".to_string(), vec![1.0, 0.0], payload("a"))]).unwrap();
        store.upsert_batch(&[("a".to_string(), vec![0.0, 1.0], payload("a"))]).unwrap();
        let results = store.query(&[0.0, 1.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.99);
    }

    #[test]
    fn memory_store_filtered_query_restricts_to_candidates() {
        let store = MemoryVectorStore::new();
        store
            .upsert_batch(&[
                ("a".to_string(), vec![1.0, 0.0], payload("a")),
                ("b".to_string(), vec![0.0, 1.0], payload("b")),
                ("c".to_string(), vec![1.0, 0.0], payload("c")),
            ])
            .unwrap();

        let results = store.filtered_query(&[1.0, 0.0], &["b".to_string(), "c".to_string()]).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.note_id != "a"));
        assert_eq!(results[0].note_id, "c");
    }

    #[test]
    fn memory_store_get_payload_and_vector() {
        let store = MemoryVectorStore::new();
        store.upsert_batch(&[("a".to_string(), vec![1.0, 0.0], payload("a"))]).unwrap();
        assert!(store.get_payload("a").unwrap().is_some());
        assert_eq!(store.get_vector("a").unwrap().unwrap(), vec![1.0, 0.0]);
        assert!(store.get_payload("missing").unwrap().is_none());
    }

    #[test]
    fn memory_store_delete_removes_note() {
        let store = MemoryVectorStore::new();
        store.upsert_batch(&[("a".to_string(), vec![1.0, 0.0], payload("a"))]).unwrap();
        store.delete("a").unwrap();
        assert!(store.get_payload("a").unwrap().is_none());
        assert!(store.query(&[1.0, 0.0], 5).unwrap().is_empty());
    }
}
