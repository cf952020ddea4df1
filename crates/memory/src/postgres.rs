//! PostgreSQL durable store.
//!
//! Same two tables as the SQLite store, for deployments where several
//! processes share one memory service. Timestamps use `TIMESTAMPTZ`;
//! JSON columns are stored as text.
//!
//! # Feature gate
//!
//! ```toml
//! mentor-memory = { workspace = true, features = ["postgres"] }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::info;

use mentor_core::error::MemoryError;
use mentor_core::memory::{
    DurableStore, MemoryItem, MemoryType, SessionPatch, SessionRecord, SessionStatus,
};

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS agent_memory (
    id          BIGSERIAL PRIMARY KEY,
    user_id     TEXT NOT NULL,
    session_id  TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    category    TEXT NOT NULL,
    content     TEXT NOT NULL,
    metadata    TEXT NOT NULL DEFAULT '{}',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires_at  TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_agent_memory_user_type ON agent_memory(user_id, memory_type);
CREATE TABLE IF NOT EXISTS agent_sessions (
    id                 BIGSERIAL PRIMARY KEY,
    session_id         TEXT UNIQUE NOT NULL,
    user_id            TEXT NOT NULL,
    started_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_activity      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    status             TEXT NOT NULL DEFAULT 'active',
    summary            TEXT,
    capabilities_used  TEXT NOT NULL DEFAULT '[]',
    activities_created TEXT NOT NULL DEFAULT '[]',
    metadata           TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_agent_sessions_user ON agent_sessions(user_id, started_at DESC);
"#;

/// PostgreSQL-backed implementation of [`DurableStore`].
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run the schema migration.
    pub async fn connect(database_url: &str) -> Result<Self, MemoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| MemoryError::Storage(format!("PostgreSQL connection failed: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to PostgreSQL for memory store");
        Ok(store)
    }

    /// Create from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the schema migration.
    pub async fn migrate(&self) -> Result<(), MemoryError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

fn row_to_item(row: &PgRow) -> Result<MemoryItem, MemoryError> {
    let memory_type: String = row.get("memory_type");
    let metadata: String = row.get("metadata");

    Ok(MemoryItem {
        id: Some(row.get("id")),
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        memory_type: MemoryType::parse(&memory_type)
            .ok_or_else(|| MemoryError::QueryFailed(format!("unknown memory_type {memory_type:?}")))?,
        category: row.get("category"),
        content: row.get("content"),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        expires_at: row.get::<Option<DateTime<Utc>>, _>("expires_at"),
    })
}

fn row_to_session(row: &PgRow) -> SessionRecord {
    let status: String = row.get("status");
    let capabilities: String = row.get("capabilities_used");
    let activities: String = row.get("activities_created");

    SessionRecord {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Active),
        summary: row.get("summary"),
        capabilities_used: serde_json::from_str(&capabilities).unwrap_or_default(),
        activities_created: serde_json::from_str(&activities).unwrap_or_default(),
        started_at: row.get("started_at"),
        last_activity: row.get("last_activity"),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, MemoryError> {
    serde_json::to_string(value).map_err(|e| MemoryError::Storage(format!("serialize: {e}")))
}

#[async_trait]
impl DurableStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn init_user_tables(&self, _user_id: &str) -> Result<(), MemoryError> {
        self.migrate().await
    }

    async fn create_session(&self, record: &SessionRecord) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO agent_sessions
                (session_id, user_id, started_at, last_activity, status, summary,
                 capabilities_used, activities_created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(record.started_at)
        .bind(record.last_activity)
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
        let row = sqlx::query(
            r#"
            INSERT INTO agent_memory
                (user_id, session_id, memory_type, category, content, metadata,
                 created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&item.user_id)
        .bind(&item.session_id)
        .bind(item.memory_type.as_str())
        .bind(&item.category)
        .bind(&item.content)
        .bind(to_json(&item.metadata)?)
        .bind(item.created_at)
        .bind(item.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("create item: {e}")))?;

        let mut stored = item.clone();
        stored.id = Some(row.get("id"));
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
            WHERE user_id = $1 AND memory_type = $2
              AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(memory_type.as_str())
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
            WHERE user_id = $1
            ORDER BY started_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("recent sessions: {e}")))?;

        Ok(rows.iter().map(row_to_session).collect())
    }

    async fn patch_session_summary(&self, session_id: &str, patch: &SessionPatch) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            UPDATE agent_sessions
            SET summary = $1, capabilities_used = $2, activities_created = $3,
                status = $4, last_activity = $5
            WHERE session_id = $6 AND status = 'active'
            "#,
        )
        .bind(&patch.summary)
        .bind(to_json(&patch.capabilities_used)?)
        .bind(to_json(&patch.activities_created)?)
        .bind(patch.status.as_str())
        .bind(patch.last_activity)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("patch session: {e}")))?;
        Ok(())
    }
}
