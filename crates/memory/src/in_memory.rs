//! In-memory durable store: useful for testing and ephemeral deployments.
//!
//! Shared between [`PersistentMemory`](crate::PersistentMemory) instances
//! through an `Arc`, it behaves like the remote service for the lifetime of
//! the process.

use async_trait::async_trait;
use chrono::Utc;
use mentor_core::error::MemoryError;
use mentor_core::memory::{
    DurableStore, MemoryItem, MemoryType, SessionPatch, SessionRecord, SessionStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    users: HashSet<String>,
    items: Vec<MemoryItem>,
    sessions: Vec<SessionRecord>,
    next_id: i64,
}

/// A process-local durable store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items across all users.
    pub async fn item_count(&self) -> usize {
        self.inner.read().await.items.len()
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn init_user_tables(&self, user_id: &str) -> Result<(), MemoryError> {
        self.inner.write().await.users.insert(user_id.to_string());
        Ok(())
    }

    async fn create_session(&self, record: &SessionRecord) -> Result<(), MemoryError> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.iter().any(|s| s.session_id == record.session_id) {
            inner.sessions.push(record.clone());
        }
        Ok(())
    }

    async fn create_item(&self, item: &MemoryItem) -> Result<MemoryItem, MemoryError> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let mut stored = item.clone();
        stored.id = Some(inner.next_id);
        inner.items.push(stored.clone());
        Ok(stored)
    }

    async fn query_items_by_type(
        &self,
        user_id: &str,
        memory_type: MemoryType,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        Ok(inner
            .items
            .iter()
            .filter(|i| i.user_id == user_id && i.memory_type == memory_type && !i.is_expired(now))
            .cloned()
            .collect())
    }

    async fn recent_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRecord>, MemoryError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<SessionRecord> = inner
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn patch_session_summary(&self, session_id: &str, patch: &SessionPatch) -> Result<(), MemoryError> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id && s.status == SessionStatus::Active)
        else {
            return Ok(());
        };

        session.summary = Some(patch.summary.clone());
        session.capabilities_used = patch.capabilities_used.clone();
        session.activities_created = patch.activities_created.clone();
        session.status = patch.status;
        session.last_activity = patch.last_activity;
        Ok(())
    }
}
