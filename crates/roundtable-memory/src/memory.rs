use std::collections::HashMap;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::session::SessionRecord;
use roundtable_core::traits::SessionStore;

/// Process-local session store. Sessions are lost on exit.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session_id: &str) -> BoxFuture<'_, Result<Option<SessionRecord>>> {
        let session_id = session_id.to_string();
        Box::pin(async move { Ok(self.sessions.read().await.get(&session_id).cloned()) })
    }

    fn save(&self, record: &SessionRecord, expected_version: u64) -> BoxFuture<'_, Result<u64>> {
        let mut record = record.clone();
        Box::pin(async move {
            let mut sessions = self.sessions.write().await;
            let found = sessions
                .get(&record.session_id)
                .map(|r| r.version)
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
            let version = record.version;
            sessions.insert(record.session_id.clone(), record);
            Ok(version)
        })
    }

    fn delete(&self, session_id: &str) -> BoxFuture<'_, Result<bool>> {
        let session_id = session_id.to_string();
        Box::pin(async move { Ok(self.sessions.write().await.remove(&session_id).is_some()) })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let sessions = self.sessions.read().await;
            let mut records: Vec<&SessionRecord> = sessions.values().collect();
            records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(records.into_iter().map(|r| r.session_id.clone()).collect())
        })
    }
}
