//! Memory records and the durable store trait.
//!
//! The agent remembers facts about each teacher across sessions:
//! preferences, session summaries and working notes. Records live in a
//! durable store when one is reachable and in a local cache otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MemoryError;

/// Lifetime class of a memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Working,
    ShortTerm,
    LongTerm,
    Preference,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Preference => "preference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "working" => Some(Self::Working),
            "short_term" => Some(Self::ShortTerm),
            "long_term" => Some(Self::LongTerm),
            "preference" => Some(Self::Preference),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single remembered fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Store-assigned id, absent until persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub user_id: String,
    pub session_id: String,
    pub memory_type: MemoryType,

    /// For preferences, the preference key.
    pub category: String,
    pub content: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        memory_type: MemoryType,
        category: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            session_id: session_id.into(),
            memory_type,
            category: category.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Lifecycle of a session record. Moves active → completed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Durable record of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub status: SessionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default)]
    pub capabilities_used: Vec<String>,

    #[serde(default)]
    pub activities_created: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    pub fn active(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            status: SessionStatus::Active,
            summary: None,
            capabilities_used: Vec::new(),
            activities_created: Vec::new(),
            started_at: now,
            last_activity: now,
        }
    }
}

/// Fields written when a session is closed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub summary: String,
    pub capabilities_used: Vec<String>,
    pub activities_created: Vec<String>,
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
}

/// The external durable memory service.
///
/// Every call may fail independently; callers treat failures as
/// degradation, never as fatal. Creation calls are idempotent.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Name of this backend (for logging).
    fn name(&self) -> &str;

    /// Prepare storage for a user. Safe to call repeatedly.
    async fn init_user_tables(&self, user_id: &str) -> std::result::Result<(), MemoryError>;

    /// Register a session. Registering an existing session id is a no-op.
    async fn create_session(&self, record: &SessionRecord) -> std::result::Result<(), MemoryError>;

    /// Persist an item and return it with its assigned id.
    async fn create_item(&self, item: &MemoryItem) -> std::result::Result<MemoryItem, MemoryError>;

    /// All unexpired items of one type for a user, oldest first.
    async fn query_items_by_type(
        &self,
        user_id: &str,
        memory_type: MemoryType,
    ) -> std::result::Result<Vec<MemoryItem>, MemoryError>;

    /// Most recent sessions for a user, newest first.
    async fn recent_sessions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<SessionRecord>, MemoryError>;

    /// Apply a summary patch to an active session.
    async fn patch_session_summary(
        &self,
        session_id: &str,
        patch: &SessionPatch,
    ) -> std::result::Result<(), MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_round_trips_through_str() {
        for t in [
            MemoryType::Working,
            MemoryType::ShortTerm,
            MemoryType::LongTerm,
            MemoryType::Preference,
        ] {
            assert_eq!(MemoryType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MemoryType::parse("episodic"), None);
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let mut item = MemoryItem::new("u", "s", MemoryType::ShortTerm, "note", "x");
        assert!(!item.is_expired(now));

        item.expires_at = Some(now);
        assert!(item.is_expired(now));
    }

    #[test]
    fn new_session_is_active() {
        let record = SessionRecord::active("s1", "u1");
        assert_eq!(record.status, SessionStatus::Active);
        assert!(record.capabilities_used.is_empty());
        assert_eq!(record.started_at, record.last_activity);
    }
}
