//! Document store: an id-keyed JSON store with optimistic revision
//! concurrency. A write must carry the revision it read, or it loses to
//! whoever wrote in between; the batch saver recovers from one conflict per
//! document by re-fetching and retrying once.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};

pub struct DocumentStore {
    conn: Connection,
}

#[derive(Debug)]
pub enum UpsertOutcome {
    Stored { rev: String },
    Conflict,
}

#[derive(Debug)]
pub struct StoredDoc {
    pub rev: String,
    pub body: Value,
}

#[derive(Debug, Default)]
pub struct SaveStats {
    pub saved: usize,
    pub recovered: usize,
    pub conflicts: usize,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<DocumentStore> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("db: can't create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                id         TEXT PRIMARY KEY,
                rev        INTEGER NOT NULL,
                body       TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(DocumentStore { conn })
    }

    pub fn get(&self, id: &str) -> Result<Option<StoredDoc>> {
        let mut stmt = self.conn.prepare("SELECT rev, body FROM documents WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        match rows.next() {
            Some(row) => {
                let (rev, body) = row?;
                Ok(Some(StoredDoc {
                    rev: rev.to_string(),
                    body: serde_json::from_str(&body).unwrap_or(Value::Null),
                }))
            }
            None => Ok(None),
        }
    }

    /// Insert when absent; update only when the expected revision matches the
    /// stored one. Everything else is a conflict for the caller to resolve.
    pub fn put(&self, id: &str, expected_rev: Option<&str>, body: &Value) -> Result<UpsertOutcome> {
        let body_text = serde_json::to_string(body)?;
        let inserted = self.conn.execute(
            "INSERT INTO documents (id, rev, body) VALUES (?1, 1, ?2)
             ON CONFLICT(id) DO NOTHING",
            rusqlite::params![id, body_text],
        )?;
        if inserted == 1 {
            return Ok(UpsertOutcome::Stored { rev: "1".to_string() });
        }
        if let Some(rev) = expected_rev.and_then(|r| r.parse::<i64>().ok()) {
            let updated = self.conn.execute(
                "UPDATE documents
                 SET rev = rev + 1, body = ?2, updated_at = datetime('now')
                 WHERE id = ?1 AND rev = ?3",
                rusqlite::params![id, body_text, rev],
            )?;
            if updated == 1 {
                return Ok(UpsertOutcome::Stored { rev: (rev + 1).to_string() });
            }
        }
        Ok(UpsertOutcome::Conflict)
    }

    /// Bulk upsert with one re-fetch-and-retry per conflicting document. A
    /// conflict that survives the retry is reported and the batch continues.
    pub fn save_all(&self, docs: Vec<(String, Option<String>, Value)>) -> Result<SaveStats> {
        info!("db: storing {} doc(s)", docs.len());
        let mut stats = SaveStats::default();
        self.conn.execute("BEGIN TRANSACTION", [])?;
        for (id, rev, body) in docs {
            match self.put(&id, rev.as_deref(), &body)? {
                UpsertOutcome::Stored { .. } => stats.saved += 1,
                UpsertOutcome::Conflict => {
                    let current_rev = self.get(&id)?.map(|d| d.rev);
                    match self.put(&id, current_rev.as_deref(), &body)? {
                        UpsertOutcome::Stored { .. } => {
                            stats.saved += 1;
                            stats.recovered += 1;
                        }
                        UpsertOutcome::Conflict => {
                            warn!("db: conflict persists for {}", id);
                            stats.conflicts += 1;
                        }
                    }
                }
            }
        }
        self.conn.execute("COMMIT", [])?;
        Ok(stats)
    }

    /// Every stored content document (identified by provenance) with its id
    /// and revision.
    pub fn all_content(&self) -> Result<Vec<(String, String, Value)>> {
        let mut stmt = self.conn.prepare("SELECT id, rev, body FROM documents")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::new();
        for (id, rev, body) in rows {
            let Ok(body) = serde_json::from_str::<Value>(&body) else { continue };
            if body.get("document_id").is_some() {
                out.push((id, rev.to_string(), body));
            }
        }
        Ok(out)
    }

    pub fn counts_by_type(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare("SELECT body FROM documents")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for body in rows {
            let Ok(body) = serde_json::from_str::<Value>(&body) else { continue };
            if let Some(kind) = body.get("type").and_then(Value::as_str) {
                *counts.entry(kind.to_string()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM documents", [])?;
        Ok(())
    }
}

/// Remove the database and its WAL sidecars.
pub fn destroy(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        match std::fs::remove_file(Path::new(&file)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("db: can't delete {}", path.display())),
        }
    }
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> DocumentStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE documents (
                id TEXT PRIMARY KEY,
                rev INTEGER NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .unwrap();
        DocumentStore { conn }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = store();
        let body = json!({"type": "tactic", "slug": "boycott", "title": "Boycott"});
        let outcome = store.put("tactic:boycott", None, &body).unwrap();
        assert!(matches!(outcome, UpsertOutcome::Stored { ref rev } if rev == "1"));
        let stored = store.get("tactic:boycott").unwrap().unwrap();
        assert_eq!(stored.rev, "1");
        assert_eq!(stored.body["title"], "Boycott");
    }

    #[test]
    fn stale_revision_conflicts() {
        let store = store();
        let body = json!({"x": 1});
        store.put("tactic:boycott", None, &body).unwrap();
        // A write without the current revision loses
        assert!(matches!(
            store.put("tactic:boycott", None, &body).unwrap(),
            UpsertOutcome::Conflict
        ));
        assert!(matches!(
            store.put("tactic:boycott", Some("99"), &body).unwrap(),
            UpsertOutcome::Conflict
        ));
        // The matching revision wins and bumps
        assert!(matches!(
            store.put("tactic:boycott", Some("1"), &body).unwrap(),
            UpsertOutcome::Stored { ref rev } if rev == "2"
        ));
    }

    #[test]
    fn save_all_retries_conflicts_once() {
        let store = store();
        store.put("tactic:boycott", None, &json!({"v": "old"})).unwrap();
        // No revision supplied: first put conflicts, the retry re-fetches
        // rev 1 and succeeds
        let stats = store
            .save_all(vec![("tactic:boycott".to_string(), None, json!({"v": "new"}))])
            .unwrap();
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.conflicts, 0);
        let stored = store.get("tactic:boycott").unwrap().unwrap();
        assert_eq!(stored.rev, "2");
        assert_eq!(stored.body["v"], "new");
    }

    #[test]
    fn opaque_garbage_revision_never_panics() {
        let store = store();
        store.put("a", None, &json!({})).unwrap();
        assert!(matches!(
            store.put("a", Some("not-a-rev"), &json!({})).unwrap(),
            UpsertOutcome::Conflict
        ));
    }

    #[test]
    fn all_content_skips_non_content_docs() {
        let store = store();
        store.put("config:api", None, &json!({"type": "config"})).unwrap();
        store
            .put("tactic:boycott", None, &json!({"type": "tactic", "document_id": "d1"}))
            .unwrap();
        let content = store.all_content().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].0, "tactic:boycott");
    }

    #[test]
    fn counts_by_type_groups() {
        let store = store();
        store.put("tactic:a", None, &json!({"type": "tactic"})).unwrap();
        store.put("tactic:b", None, &json!({"type": "tactic"})).unwrap();
        store.put("story:c", None, &json!({"type": "story"})).unwrap();
        let counts = store.counts_by_type().unwrap();
        assert_eq!(counts, vec![("story".to_string(), 1), ("tactic".to_string(), 2)]);
    }
}
