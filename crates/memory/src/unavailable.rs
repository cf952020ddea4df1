//! Unavailable store: every durable call fails.
//!
//! Used when no backend is configured or the configured one cannot be
//! opened. [`PersistentMemory`](crate::PersistentMemory) then runs from its
//! local cache alone.

use async_trait::async_trait;
use mentor_core::error::MemoryError;
use mentor_core::memory::{DurableStore, MemoryItem, MemoryType, SessionPatch, SessionRecord};

/// A durable store that is never reachable.
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> MemoryError {
        MemoryError::Unavailable(self.reason.clone())
    }
}

#[async_trait]
impl DurableStore for UnavailableStore {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn init_user_tables(&self, _user_id: &str) -> Result<(), MemoryError> {
        Err(self.error())
    }

    async fn create_session(&self, _record: &SessionRecord) -> Result<(), MemoryError> {
        Err(self.error())
    }

    async fn create_item(&self, _item: &MemoryItem) -> Result<MemoryItem, MemoryError> {
        Err(self.error())
    }

    async fn query_items_by_type(
        &self,
        _user_id: &str,
        _memory_type: MemoryType,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        Err(self.error())
    }

    async fn recent_sessions(&self, _user_id: &str, _limit: usize) -> Result<Vec<SessionRecord>, MemoryError> {
        Err(self.error())
    }

    async fn patch_session_summary(&self, _session_id: &str, _patch: &SessionPatch) -> Result<(), MemoryError> {
        Err(self.error())
    }
}
