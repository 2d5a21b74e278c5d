use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::storage::{SessionStore, SessionSummary, StoredSession};

/// In-process session store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, record: &StoredSession) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut record = record.clone();
        if let Some(existing) = records.get(&record.id) {
            record.created_at = existing.created_at;
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<StoredSession>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let records = self.records.lock().await;
        let mut summaries: Vec<SessionSummary> = records
            .values()
            .map(|r| SessionSummary {
                id: r.id.clone(),
                user_id: r.user_id.clone(),
                updated_at: r.updated_at,
                parent_id: r.parent_id.clone(),
                message_count: r.messages.len(),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
