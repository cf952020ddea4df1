//! Persistent memory for Mentor.
//!
//! [`PersistentMemory`] is the per-(user, session) facade. It writes every
//! item to a bounded [`LocalCache`] and, best-effort, to a [`DurableStore`]
//! backend:
//!
//! - [`SqliteStore`]: single-file SQLite (default)
//! - [`PostgresStore`]: shared PostgreSQL service (`postgres` feature)
//! - [`InMemoryStore`]: process-local, for tests and `backend = "memory"`
//! - [`UnavailableStore`]: always fails, forcing local-cache operation
//!
//! [`DurableStore`]: mentor_core::DurableStore

pub mod cache;
pub mod in_memory;
pub mod learn;
pub mod persistent;
pub mod unavailable;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use cache::LocalCache;
pub use in_memory::InMemoryStore;
pub use learn::extract_preferences;
pub use persistent::{MemorySettings, PersistentMemory};
pub use unavailable::UnavailableStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use std::sync::Arc;

use mentor_config::MemoryConfig;
use mentor_core::DurableStore;

/// Build the durable store selected by `config.backend`.
///
/// A store that cannot be opened is replaced by [`UnavailableStore`], so
/// memory degrades to the local cache instead of failing startup.
pub async fn build_store(config: &MemoryConfig) -> Arc<dyn DurableStore> {
    match config.backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.resolved_sqlite_path();
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match SqliteStore::new(&path.to_string_lossy()).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "SQLite store unavailable, using local cache only");
                    Arc::new(UnavailableStore::new(e.to_string()))
                }
            }
        }
        #[cfg(feature = "postgres")]
        "postgres" => {
            let Some(url) = config.database_url.as_deref() else {
                tracing::warn!("memory.backend = \"postgres\" without database_url");
                return Arc::new(UnavailableStore::new("database_url not set"));
            };
            match PostgresStore::connect(url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "PostgreSQL store unavailable, using local cache only");
                    Arc::new(UnavailableStore::new(e.to_string()))
                }
            }
        }
        "memory" => Arc::new(InMemoryStore::new()),
        other => {
            tracing::info!(backend = other, "No durable memory store configured");
            Arc::new(UnavailableStore::new(format!("backend \"{other}\" not available")))
        }
    }
}
