//! Per-session memory facade.
//!
//! Every write lands in the [`LocalCache`] first and is then forwarded to
//! the durable store. Store failures flip the facade into degraded mode
//! (cache only) and are logged; no method here returns an error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use mentor_config::MemoryConfig;
use mentor_core::memory::{
    DurableStore, MemoryItem, MemoryType, SessionPatch, SessionRecord, SessionStatus,
};

use crate::cache::LocalCache;
use crate::learn::extract_preferences;

/// Sessions included in [`PersistentMemory::get_memory_context`].
const CONTEXT_SESSIONS: usize = 3;

/// Working notes included in [`PersistentMemory::format_for_prompt`].
const PROMPT_WORKING_NOTES: usize = 5;

/// Limits and switches for one [`PersistentMemory`].
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub max_working_memory: usize,
    pub max_short_term_memory: usize,
    pub short_term_ttl: Duration,
    pub long_term_enabled: bool,
    /// Directory for the local cache file; `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_working_memory: 20,
            max_short_term_memory: 50,
            short_term_ttl: Duration::hours(24),
            long_term_enabled: true,
            cache_dir: None,
        }
    }
}

impl From<&MemoryConfig> for MemorySettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            max_working_memory: config.max_working_memory,
            max_short_term_memory: config.max_short_term_memory,
            short_term_ttl: Duration::hours(config.short_term_ttl_hours as i64),
            long_term_enabled: config.long_term_enabled,
            cache_dir: Some(config.resolved_cache_dir()),
        }
    }
}

/// Memory for one (user, session) pair.
pub struct PersistentMemory {
    user_id: String,
    session_id: String,
    settings: MemorySettings,
    store: Arc<dyn DurableStore>,
    cache: Mutex<LocalCache>,
    store_available: AtomicBool,
    session_closed: AtomicBool,
}

impl PersistentMemory {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        store: Arc<dyn DurableStore>,
        settings: MemorySettings,
    ) -> Self {
        let user_id = user_id.into();
        let cache = match &settings.cache_dir {
            Some(dir) => LocalCache::at(LocalCache::path_for(dir, &user_id)),
            None => LocalCache::in_memory(),
        };

        Self {
            user_id,
            session_id: session_id.into(),
            settings,
            store,
            cache: Mutex::new(cache),
            store_available: AtomicBool::new(true),
            session_closed: AtomicBool::new(false),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the durable store answered the last call.
    pub fn is_store_available(&self) -> bool {
        self.store_available.load(Ordering::Relaxed)
    }

    /// Replay the local cache file and register the session with the store.
    ///
    /// Returns `true` when the durable store is reachable.
    pub async fn initialize(&self) -> bool {
        {
            let mut cache = self.cache.lock().await;
            match cache.load() {
                Ok(count) if count > 0 => {
                    debug!(user_id = %self.user_id, count, "Replayed local memory cache");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Ignoring unreadable local memory cache"),
            }
        }

        let registered = async {
            self.store.init_user_tables(&self.user_id).await?;
            self.store
                .create_session(&SessionRecord::active(&self.session_id, &self.user_id))
                .await
        }
        .await;

        match registered {
            Ok(()) => {
                self.store_available.store(true, Ordering::Relaxed);
                info!(
                    user_id = %self.user_id,
                    session_id = %self.session_id,
                    store = self.store.name(),
                    "Persistent memory initialized"
                );
                true
            }
            Err(e) => {
                self.store_available.store(false, Ordering::Relaxed);
                warn!(
                    user_id = %self.user_id,
                    store = self.store.name(),
                    error = %e,
                    "Durable memory unavailable, using local cache"
                );
                false
            }
        }
    }

    /// Store an item in the cache and, best-effort, in the durable store.
    pub async fn save_memory(
        &self,
        memory_type: MemoryType,
        category: &str,
        content: &str,
        metadata: Map<String, Value>,
    ) -> MemoryItem {
        let mut item = MemoryItem::new(
            &self.user_id,
            &self.session_id,
            memory_type,
            category,
            content,
        );
        item.metadata = metadata;
        if memory_type == MemoryType::ShortTerm {
            item.expires_at = Some(item.created_at + self.settings.short_term_ttl);
        }

        let max = match memory_type {
            MemoryType::Working => self.settings.max_working_memory,
            _ => self.settings.max_short_term_memory,
        };
        self.cache.lock().await.push(item.clone(), max);

        if !self.is_store_available() {
            return item;
        }

        match self.store.create_item(&item).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(category, error = %e, "Failed to persist memory item");
                item
            }
        }
    }

    pub async fn save_working_memory(
        &self,
        category: &str,
        content: &str,
        metadata: Map<String, Value>,
    ) -> MemoryItem {
        self.save_memory(MemoryType::Working, category, content, metadata)
            .await
    }

    pub async fn save_preference(
        &self,
        key: &str,
        value: &str,
        metadata: Map<String, Value>,
    ) -> MemoryItem {
        self.save_memory(MemoryType::Preference, key, value, metadata)
            .await
    }

    /// Current preferences, one per key (latest wins), expired ones skipped.
    ///
    /// Store results are merged with the local cache, which also holds
    /// preferences saved by any session while the store was unreachable.
    pub async fn get_preferences(&self) -> Vec<MemoryItem> {
        let mut items = {
            let mut cache = self.cache.lock().await;
            if let Err(e) = cache.refresh() {
                warn!(error = %e, "Ignoring unreadable local memory cache");
            }
            cache.items(MemoryType::Preference).to_vec()
        };
        if let Some(stored) = self.query_store(MemoryType::Preference).await {
            items.extend(stored);
        }

        let now = Utc::now();
        let mut latest: BTreeMap<String, MemoryItem> = BTreeMap::new();
        for item in items.into_iter().filter(|i| !i.is_expired(now)) {
            match latest.get(&item.category) {
                Some(existing) if existing.created_at > item.created_at => {}
                _ => {
                    latest.insert(item.category.clone(), item);
                }
            }
        }
        latest.into_values().collect()
    }

    /// Most recent sessions for this user. Empty when the store is down.
    pub async fn get_recent_sessions(&self, limit: usize) -> Vec<SessionRecord> {
        if !self.is_store_available() {
            return Vec::new();
        }
        match self.store.recent_sessions(&self.user_id, limit).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Failed to fetch recent sessions");
                Vec::new()
            }
        }
    }

    /// Digest of preferences and recent sessions for prompt injection.
    pub async fn get_memory_context(&self) -> String {
        let preferences = self.get_preferences().await;
        let sessions = self.get_recent_sessions(CONTEXT_SESSIONS).await;

        let mut parts = Vec::new();
        if !preferences.is_empty() {
            parts.push("PREFERÊNCIAS DO PROFESSOR:".to_string());
            for pref in &preferences {
                parts.push(format!("- {}: {}", pref.category, pref.content));
            }
        }

        if !sessions.is_empty() {
            if !parts.is_empty() {
                parts.push(String::new());
            }
            parts.push("SESSÕES RECENTES:".to_string());
            for session in &sessions {
                let activities = if session.activities_created.is_empty() {
                    "nenhuma".to_string()
                } else {
                    session.activities_created.join(", ")
                };
                parts.push(format!(
                    "- {}: {} (atividades: {activities})",
                    session.started_at.format("%Y-%m-%d %H:%M"),
                    session.summary.as_deref().unwrap_or("sem resumo"),
                ));
            }
        }

        parts.join("\n")
    }

    /// Close the session with a summary. Only the first call has effect.
    ///
    /// Returns `true` when this call closed the session.
    pub async fn update_session_summary(
        &self,
        summary: &str,
        capabilities_used: Vec<String>,
        activities_created: Vec<String>,
    ) -> bool {
        if self.session_closed.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "Session already completed");
            return false;
        }

        let patch = SessionPatch {
            summary: summary.to_string(),
            capabilities_used,
            activities_created,
            status: SessionStatus::Completed,
            last_activity: Utc::now(),
        };

        if self.is_store_available()
            && let Err(e) = self
                .store
                .patch_session_summary(&self.session_id, &patch)
                .await
        {
            warn!(session_id = %self.session_id, error = %e, "Failed to update session summary");
        }
        true
    }

    /// Derive preferences from a request. Returns how many were saved.
    pub async fn learn_from_interaction(&self, request: &str) -> usize {
        if !self.settings.long_term_enabled {
            return 0;
        }

        let learned = extract_preferences(request);
        let excerpt: String = request.chars().take(200).collect();
        for (key, value) in &learned {
            let mut metadata = Map::new();
            metadata.insert("source".into(), json!("auto_learn"));
            metadata.insert("prompt".into(), json!(excerpt));
            metadata.insert("learned_at".into(), json!(Utc::now().timestamp_millis()));
            self.save_preference(key, value, metadata).await;
        }

        if !learned.is_empty() {
            debug!(user_id = %self.user_id, count = learned.len(), "Learned preferences");
        }
        learned.len()
    }

    /// Last working notes, rendered for a prompt.
    pub async fn format_for_prompt(&self) -> String {
        let cache = self.cache.lock().await;
        let working = cache.items(MemoryType::Working);
        if working.is_empty() {
            return String::new();
        }

        let start = working.len().saturating_sub(PROMPT_WORKING_NOTES);
        let mut out = String::from("MEMÓRIA DE TRABALHO:");
        for item in &working[start..] {
            out.push_str(&format!("\n- [{}] {}", item.category, item.content));
        }
        out
    }

    async fn query_store(&self, memory_type: MemoryType) -> Option<Vec<MemoryItem>> {
        if !self.is_store_available() {
            return None;
        }
        match self
            .store
            .query_items_by_type(&self.user_id, memory_type)
            .await
        {
            Ok(items) => Some(items),
            Err(e) => {
                warn!(memory_type = %memory_type, error = %e, "Store query failed, reading local cache");
                None
            }
        }
    }
}
