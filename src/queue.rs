//! The extraction queue: the stop-hook side (ticket creation, enqueued
//! fast and synchronously) and the worker side (reading/moving tickets
//! to `processed/`), grounded directly on the original `enqueue.py`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::models::Ticket;

/// Count `user`/`assistant` typed JSONL events, tolerating malformed or
/// unreadable lines the same way the original does.
pub fn count_turns(transcript_path: &Path) -> u64 {
    let Ok(text) = std::fs::read_to_string(transcript_path) else { return 0 };
    text.lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|event| matches!(event.get("type").and_then(|t| t.as_str()), Some("user") | Some("assistant")))
        .count() as u64
}

pub enum EnqueueOutcome {
    Enqueued { ticket_path: std::path::PathBuf },
    SkippedNoTranscript,
    SkippedTooShort { turn_count: u64 },
    SkippedAlreadyProcessed { new_turns: i64 },
    ReEnqueued { ticket_path: std::path::PathBuf, grew_from: u64, grew_to: u64 },
}

/// Drop a ticket into `queue_dir`, or decide this session doesn't
/// warrant one yet, following the original's skip/re-enqueue rules:
/// skip below `min_turns`, skip an already-processed session unless it
/// grew by at least `min_new_turns`.
pub fn enqueue(
    queue_dir: &Path,
    session_id: &str,
    transcript_path: &str,
    cwd: &str,
    min_turns: u64,
    min_new_turns: u64,
) -> Result<EnqueueOutcome> {
    let transcript = Path::new(transcript_path);
    if transcript_path.is_empty() || !transcript.exists() {
        return Ok(EnqueueOutcome::SkippedNoTranscript);
    }

    let turn_count = count_turns(transcript);
    if turn_count < min_turns {
        return Ok(EnqueueOutcome::SkippedTooShort { turn_count });
    }

    let processed_path = queue_dir.join("processed").join(format!("{session_id}.json"));
    if processed_path.exists() {
        let processed: Ticket = serde_json::from_str(&std::fs::read_to_string(&processed_path)?)
            .with_context(|| format!("parsing processed ticket {}", processed_path.display()))?;
        let new_turns = turn_count as i64 - processed.turn_count as i64;
        if new_turns >= min_new_turns as i64 {
            std::fs::remove_file(&processed_path)?;
        } else {
            return Ok(EnqueueOutcome::SkippedAlreadyProcessed { new_turns });
        }
    }

    std::fs::create_dir_all(queue_dir)?;
    let ticket = Ticket {
        session_id: session_id.to_string(),
        transcript_path: transcript_path.to_string(),
        cwd: cwd.to_string(),
        turn_count,
        enqueued_at: Utc::now().format("%Y-%m-%d").to_string(),
        processed_at: None,
    };

    let ticket_path = queue_dir.join(format!("{session_id}.json"));
    std::fs::write(&ticket_path, serde_json::to_string_pretty(&ticket)?)
        .with_context(|| format!("writing ticket {}", ticket_path.display()))?;

    if processed_path.exists() {
        Ok(EnqueueOutcome::ReEnqueued { ticket_path, grew_from: 0, grew_to: turn_count })
    } else {
        Ok(EnqueueOutcome::Enqueued { ticket_path })
    }
}

/// List pending tickets (everything directly under `queue_dir`, not in
/// `processed/`), oldest filename first.
pub fn pending_tickets(queue_dir: &Path) -> Result<Vec<Ticket>> {
    let Ok(entries) = std::fs::read_dir(queue_dir) else { return Ok(vec![]) };
    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|p| {
            let text = std::fs::read_to_string(&p).with_context(|| format!("reading ticket {}", p.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing ticket {}", p.display()))
        })
        .collect()
}

/// Move a ticket from the queue root into `processed/`, stamping
/// `processed_at`.
pub fn mark_processed(queue_dir: &Path, ticket: &Ticket) -> Result<()> {
    let processed_dir = queue_dir.join("processed");
    std::fs::create_dir_all(&processed_dir)?;

    let mut done = ticket.clone();
    done.processed_at = Some(Utc::now().format("%Y-%m-%d").to_string());

    let dest = processed_dir.join(format!("{}.json", done.session_id));
    std::fs::write(&dest, serde_json::to_string_pretty(&done)?)?;

    let src = queue_dir.join(format!("{}.json", ticket.session_id));
    if src.exists() {
        std::fs::remove_file(&src)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_transcript(dir: &Path, turns: usize) -> std::path::PathBuf {
        let path = dir.join("transcript.jsonl");
        let mut lines = Vec::new();
        for i in 0..turns {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            lines.push(format!(r#"{{"type":"{role}","message":{{"content":"turn {i}"}}}}"#));
        }
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn skips_missing_transcript() {
        let dir = tempdir().unwrap();
        let outcome = enqueue(&dir.path().join("queue"), "s1", "", "/cwd", 5, 10).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::SkippedNoTranscript));
    }

    #[test]
    fn skips_too_short() {
        let dir = tempdir().unwrap();
        let transcript = write_transcript(dir.path(), 3);
        let outcome = enqueue(
            &dir.path().join("queue"),
            "s1",
            transcript.to_str().unwrap(),
            "/cwd",
            5,
            10,
        )
        .unwrap();
        assert!(matches!(outcome, EnqueueOutcome::SkippedTooShort { turn_count: 3 }));
    }

    #[test]
    fn enqueues_ticket() {
        let dir = tempdir().unwrap();
        let transcript = write_transcript(dir.path(), 6);
        let queue_dir = dir.path().join("queue");
        let outcome = enqueue(&queue_dir, "s1", transcript.to_str().unwrap(), "/cwd", 5, 10).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Enqueued { .. }));
        assert!(queue_dir.join("s1.json").exists());
    }

    #[test]
    fn skips_already_processed_without_enough_growth() {
        let dir = tempdir().unwrap();
        let transcript = write_transcript(dir.path(), 12);
        let queue_dir = dir.path().join("queue");
        std::fs::create_dir_all(queue_dir.join("processed")).unwrap();
        let processed = Ticket {
            session_id: "s1".to_string(),
            transcript_path: transcript.to_str().unwrap().to_string(),
            cwd: "/cwd".to_string(),
            turn_count: 10,
            enqueued_at: "2026-01-01".to_string(),
            processed_at: Some("2026-01-01".to_string()),
        };
        std::fs::write(
            queue_dir.join("processed").join("s1.json"),
            serde_json::to_string(&processed).unwrap(),
        )
        .unwrap();

        let outcome = enqueue(&queue_dir, "s1", transcript.to_str().unwrap(), "/cwd", 5, 10).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::SkippedAlreadyProcessed { new_turns: 2 }));
    }

    #[test]
    fn mark_processed_moves_ticket() {
        let dir = tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        std::fs::create_dir_all(&queue_dir).unwrap();
        let ticket = Ticket {
            session_id: "s1".to_string(),
            transcript_path: "/t".to_string(),
            cwd: "/cwd".to_string(),
            turn_count: 6,
            enqueued_at: "2026-01-01".to_string(),
            processed_at: None,
        };
        std::fs::write(queue_dir.join("s1.json"), serde_json::to_string(&ticket).unwrap()).unwrap();

        mark_processed(&queue_dir, &ticket).unwrap();
        assert!(!queue_dir.join("s1.json").exists());
        assert!(queue_dir.join("processed").join("s1.json").exists());
    }
}
