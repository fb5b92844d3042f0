use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::session::SessionRecord;
use roundtable_core::traits::SessionStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    record_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_updated
    ON sessions(updated_at DESC);";

/// Session store backed by SQLite. One row per session holds the whole
/// serialized record, so a save replaces the previous snapshot atomically.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> RoundtableError {
    RoundtableError::Database(e.to_string())
}

impl SqliteSessionStore {
    /// Open or create the session database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RoundtableError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Session store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn load(&self, session_id: &str) -> BoxFuture<'_, Result<Option<SessionRecord>>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let json: Option<String> = conn
                .query_row(
                    "SELECT record_json FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            match json {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
    }

    fn save(&self, record: &SessionRecord, expected_version: u64) -> BoxFuture<'_, Result<u64>> {
        let mut record = record.clone();
        Box::pin(async move {
            let mut conn = self.conn.lock().map_err(db_err)?;
            let tx = conn.transaction().map_err(db_err)?;

            let found: u64 = tx
                .query_row(
                    "SELECT version FROM sessions WHERE session_id = ?1",
                    params![record.session_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(db_err)?
                .map(|v| v as u64)
                .unwrap_or(0);

            if found != expected_version {
                return Err(RoundtableError::VersionConflict {
                    session_id: record.session_id,
                    expected: expected_version,
                    found,
                });
            }

            record.version = found + 1;
            record.updated_at = Utc::now();
            let json = serde_json::to_string(&record)?;

            tx.execute(
                "INSERT INTO sessions (session_id, version, record_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                     version = excluded.version,
                     record_json = excluded.record_json,
                     updated_at = excluded.updated_at",
                params![
                    record.session_id,
                    record.version as i64,
                    json,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;

            debug!(session_id = %record.session_id, version = record.version, "Session saved");
            Ok(record.version)
        })
    }

    fn delete(&self, session_id: &str) -> BoxFuture<'_, Result<bool>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let deleted = conn
                .execute(
                    "DELETE FROM sessions WHERE session_id = ?1",
                    params![session_id],
                )
                .map_err(db_err)?;
            Ok(deleted > 0)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let mut stmt = conn
                .prepare("SELECT session_id, updated_at FROM sessions")
                .map_err(db_err)?;
            let mut rows: Vec<(String, DateTime<Utc>)> = stmt
                .query_map([], |row| {
                    let ts: String = row.get(1)?;
                    Ok((
                        row.get(0)?,
                        DateTime::parse_from_rfc3339(&ts)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    ))
                })
                .map_err(db_err)?
                .filter_map(|r| r.ok())
                .collect();
            rows.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(rows.into_iter().map(|(id, _)| id).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_core::session::PendingTask;
    use serde_json::json;

    fn record(id: &str) -> SessionRecord {
        let mut r = SessionRecord::new(id);
        r.state.insert("topic".into(), json!("quantum computing"));
        r.paused_at = Some("human_feedback".into());
        r.next = vec![PendingTask::node("human_feedback")];
        r.pending_interrupt = true;
        r
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let v = store.save(&record("s1"), 0).await.unwrap();
        assert_eq!(v, 1);

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.state["topic"], json!("quantum computing"));
        assert_eq!(loaded.paused_at.as_deref(), Some("human_feedback"));
        assert!(loaded.pending_interrupt);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = SqliteSessionStore::in_memory().unwrap();
        store.save(&record("s1"), 0).await.unwrap();
        store.save(&record("s1"), 1).await.unwrap();

        let err = store.save(&record("s1"), 1).await.unwrap_err();
        assert!(matches!(
            err,
            RoundtableError::VersionConflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let store = SqliteSessionStore::in_memory().unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
        store.save(&record("s1"), 0).await.unwrap();
        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let (_dir, path) = roundtable_test_utils::temp_db();
        {
            let store = SqliteSessionStore::open(&path).unwrap();
            store.save(&record("s1"), 0).await.unwrap();
            store.save(&record("s2"), 0).await.unwrap();
        }
        let store = SqliteSessionStore::open(&path).unwrap();
        let ids = store.list().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"s1".to_string()));
        assert_eq!(store.load("s2").await.unwrap().unwrap().version, 1);
    }
}
