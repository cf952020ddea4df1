//! SQLite durable store.
//!
//! One database file with two tables:
//! - `agent_memory`: memory items keyed by user, session and type
//! - `agent_sessions`: one row per session with its closing summary
//!
//! Timestamps are stored as RFC 3339 text in UTC so that lexical order
//! matches chronological order; JSON columns are stored as text.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mentor_core::error::MemoryError;
use mentor_core::memory::{
    DurableStore, MemoryItem, MemoryType, SessionPatch, SessionRecord, SessionStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// SQLite-backed implementation of [`DurableStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // A single connection keeps ":memory:" databases shared across queries
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_memory (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                category    TEXT NOT NULL,
                content     TEXT NOT NULL,
                metadata    TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                expires_at  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agent_memory table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_memory_user_type ON agent_memory(user_id, memory_type)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agent_memory index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_sessions (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id         TEXT UNIQUE NOT NULL,
                user_id            TEXT NOT NULL,
                started_at         TEXT NOT NULL,
                last_activity      TEXT NOT NULL,
                status             TEXT NOT NULL DEFAULT 'active',
                summary            TEXT,
                capabilities_used  TEXT NOT NULL DEFAULT '[]',
                activities_created TEXT NOT NULL DEFAULT '[]',
                metadata           TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agent_sessions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_sessions_user ON agent_sessions(user_id, started_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agent_sessions index: {e}")))?;

        debug!("SQLite memory migrations complete");
        Ok(())
    }
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MemoryError::QueryFailed(format!("bad timestamp {raw:?}: {e}")))
}

fn row_to_item(row: &SqliteRow) -> Result<MemoryItem, MemoryError> {
    let memory_type: String = row.get("memory_type");
    let metadata: String = row.get("metadata");
    let created_at: String = row.get("created_at");
    let expires_at: Option<String> = row.get("expires_at");

    Ok(MemoryItem {
        id: Some(row.get("id")),
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        memory_type: MemoryType::parse(&memory_type)
            .ok_or_else(|| MemoryError::QueryFailed(format!("unknown memory_type {memory_type:?}")))?,
        category: row.get("category"),
        content: row.get("content"),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: parse_timestamp(&created_at)?,
        expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn row_to_session(row: &SqliteRow) -> Result<SessionRecord, MemoryError> {
    let status: String = row.get("status");
    let capabilities: String = row.get("capabilities_used");
    let activities: String = row.get("activities_created");
    let started_at: String = row.get("started_at");
    let last_activity: String = row.get("last_activity");

    Ok(SessionRecord {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Active),
        summary: row.get("summary"),
        capabilities_used: serde_json::from_str(&capabilities).unwrap_or_default(),
        activities_created: serde_json::from_str(&activities).unwrap_or_default(),
        started_at: parse_timestamp(&started_at)?,
        last_activity: parse_timestamp(&last_activity)?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, MemoryError> {
    serde_json::to_string(value).map_err(|e| MemoryError::Storage(format!("serialize: {e}")))
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn init_user_tables(&self, user_id: &str) -> Result<(), MemoryError> {
        debug!(user_id, "Ensuring memory tables");
        self.run_migrations().await
    }

    async fn create_session(&self, record: &SessionRecord) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO agent_sessions
                (session_id, user_id, started_at, last_activity, status, summary,
                 capabilities_used, activities_created)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(timestamp(record.started_at))
        .bind(timestamp(record.last_activity))
        .bind(record.status.as_str())
        .bind(&record.summary)
        .bind(to_json(&record.capabilities_used)?)
        .bind(to_json(&record.activities_created)?)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("create session: {e}")))?;

        Ok(())
    }

    async fn create_item(&self, item: &MemoryItem) -> Result<MemoryItem, MemoryError> {
        let created = timestamp(item.created_at);
        let result = sqlx::query(
            r#"
            INSERT INTO agent_memory
                (user_id, session_id, memory_type, category, content, metadata,
                 created_at, updated_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.user_id)
        .bind(&item.session_id)
        .bind(item.memory_type.as_str())
        .bind(&item.category)
        .bind(&item.content)
        .bind(to_json(&item.metadata)?)
        .bind(&created)
        .bind(&created)
        .bind(item.expires_at.map(timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("create item: {e}")))?;

        let mut stored = item.clone();
        stored.id = Some(result.last_insert_rowid());
        Ok(stored)
    }

    async fn query_items_by_type(
        &self,
        user_id: &str,
        memory_type: MemoryType,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, session_id, memory_type, category, content, metadata,
                   created_at, expires_at
            FROM agent_memory
            WHERE user_id = ? AND memory_type = ?
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(memory_type.as_str())
        .bind(timestamp(Utc::now()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("query items: {e}")))?;

        rows.iter().map(row_to_item).collect()
    }

    async fn recent_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRecord>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, user_id, started_at, last_activity, status, summary,
                   capabilities_used, activities_created
            FROM agent_sessions
            WHERE user_id = ?
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("recent sessions: {e}")))?;

        rows.iter().map(row_to_session).collect()
    }

    async fn patch_session_summary(&self, session_id: &str, patch: &SessionPatch) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            UPDATE agent_sessions
            SET summary = ?, capabilities_used = ?, activities_created = ?,
                status = ?, last_activity = ?
            WHERE session_id = ? AND status = 'active'
            "#,
        )
        .bind(&patch.summary)
        .bind(to_json(&patch.capabilities_used)?)
        .bind(to_json(&patch.activities_created)?)
        .bind(patch.status.as_str())
        .bind(timestamp(patch.last_activity))
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("patch session: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn items_round_trip_with_metadata() {
        let store = store().await;
        let mut item = MemoryItem::new("u1", "s1", MemoryType::Preference, "frequent_grade", "7º ano");
        item.metadata.insert("source".into(), serde_json::json!("auto_learn"));

        let stored = store.create_item(&item).await.unwrap();
        assert!(stored.id.is_some());

        let items = store.query_items_by_type("u1", MemoryType::Preference).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "7º ano");
        assert_eq!(items[0].metadata["source"], "auto_learn");
    }

    #[tokio::test]
    async fn expired_items_are_filtered() {
        let store = store().await;
        let mut stale = MemoryItem::new("u1", "s1", MemoryType::ShortTerm, "note", "old");
        stale.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        let mut fresh = MemoryItem::new("u1", "s1", MemoryType::ShortTerm, "note", "new");
        fresh.expires_at = Some(Utc::now() + chrono::Duration::hours(1));

        store.create_item(&stale).await.unwrap();
        store.create_item(&fresh).await.unwrap();

        let items = store.query_items_by_type("u1", MemoryType::ShortTerm).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "new");
    }

    #[tokio::test]
    async fn sessions_are_idempotent_and_ordered() {
        let store = store().await;
        let mut older = SessionRecord::active("s-old", "u1");
        older.started_at = Utc::now() - chrono::Duration::hours(2);
        let newer = SessionRecord::active("s-new", "u1");

        store.create_session(&older).await.unwrap();
        store.create_session(&newer).await.unwrap();
        store.create_session(&newer).await.unwrap();

        let sessions = store.recent_sessions("u1", 5).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "s-new");

        let limited = store.recent_sessions("u1", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn patch_completes_session_once() {
        let store = store().await;
        store.create_session(&SessionRecord::active("s1", "u1")).await.unwrap();

        let patch = SessionPatch {
            summary: "2 activities created".into(),
            capabilities_used: vec!["create_activity".into(), "save_activities".into()],
            activities_created: vec!["Quiz".into()],
            status: SessionStatus::Completed,
            last_activity: Utc::now(),
        };
        store.patch_session_summary("s1", &patch).await.unwrap();

        let second = SessionPatch {
            summary: "overwritten".into(),
            ..patch.clone()
        };
        store.patch_session_summary("s1", &second).await.unwrap();

        let sessions = store.recent_sessions("u1", 1).await.unwrap();
        assert_eq!(sessions[0].status, SessionStatus::Completed);
        assert_eq!(sessions[0].summary.as_deref(), Some("2 activities created"));
        assert_eq!(sessions[0].capabilities_used.len(), 2);
    }

    #[tokio::test]
    async fn init_user_tables_is_repeatable() {
        let store = store().await;
        store.init_user_tables("u1").await.unwrap();
        store.init_user_tables("u1").await.unwrap();
    }
}
