//! Session-scoped state owned by the caller.
//!
//! A [`SessionManager`] maps session ids to [`SessionContext`]s. Sessions
//! are created, touched and expired by explicit calls; nothing runs in the
//! background.

use mentor_memory::PersistentMemory;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::ContextEngine;

/// Per-session handles. Cloning shares the same engine and memory.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub context: Arc<Mutex<ContextEngine>>,
    pub memory: Arc<PersistentMemory>,
    pub created_at: Instant,
    pub last_touched: Instant,
    /// Reasoning calls made for the session since the last turn report.
    pending_calls: Arc<AtomicU32>,
}

impl SessionContext {
    pub fn new(context: ContextEngine, memory: Arc<PersistentMemory>) -> Self {
        let now = Instant::now();
        Self {
            session_id: memory.session_id().to_string(),
            user_id: memory.user_id().to_string(),
            context: Arc::new(Mutex::new(context)),
            memory,
            created_at: now,
            last_touched: now,
            pending_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Count a reasoning call toward the next turn report.
    pub fn count_call(&self) {
        self.pending_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls counted since the last report, resetting the count.
    pub fn take_calls(&self) -> u32 {
        self.pending_calls.swap(0, Ordering::Relaxed)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched)
    }
}

#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<String, SessionContext>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any previous one with the same id.
    pub fn create(&mut self, session: SessionContext) -> SessionContext {
        debug!(session_id = %session.session_id, user_id = %session.user_id, "Session created");
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// Register `session` unless its id is already live, then touch and
    /// return whichever session holds the id.
    pub fn get_or_insert(&mut self, session: SessionContext) -> SessionContext {
        let entry = match self.sessions.entry(session.session_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(session_id = %session.session_id, user_id = %session.user_id, "Session created");
                entry.insert(session)
            }
        };
        entry.last_touched = Instant::now();
        entry.clone()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions.get(session_id).cloned()
    }

    /// Mark a session as used now. Returns false for unknown ids.
    pub fn touch(&mut self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.last_touched = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn expire(&mut self, session_id: &str) -> Option<SessionContext> {
        let removed = self.sessions.remove(session_id);
        if removed.is_some() {
            debug!(session_id, "Session expired");
        }
        removed
    }

    /// Drop every session idle for longer than `max_age` at `now`.
    /// Returns the expired ids.
    pub fn expire_older_than(&mut self, now: Instant, max_age: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.idle_for(now) > max_age)
            .map(|s| s.session_id.clone())
            .collect();
        for id in &stale {
            self.sessions.remove(id);
        }
        if !stale.is_empty() {
            debug!(expired = stale.len(), "Expired idle sessions");
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_memory::{InMemoryStore, MemorySettings};

    fn session(id: &str) -> SessionContext {
        let memory = PersistentMemory::new(
            "prof",
            id,
            Arc::new(InMemoryStore::new()),
            MemorySettings::default(),
        );
        SessionContext::new(ContextEngine::new(id), Arc::new(memory))
    }

    #[test]
    fn create_get_expire() {
        let mut sessions = SessionManager::new();
        sessions.create(session("s1"));
        assert_eq!(sessions.get("s1").unwrap().user_id, "prof");
        assert!(sessions.get("s2").is_none());

        assert!(sessions.expire("s1").is_some());
        assert!(sessions.expire("s1").is_none());
        assert!(sessions.is_empty());
    }

    #[test]
    fn touch_unknown_session() {
        let mut sessions = SessionManager::new();
        sessions.create(session("s1"));
        assert!(sessions.touch("s1"));
        assert!(!sessions.touch("nope"));
    }

    #[test]
    fn expire_older_than_uses_the_given_clock() {
        let mut sessions = SessionManager::new();
        sessions.create(session("s1"));
        sessions.create(session("s2"));
        let hour = Duration::from_secs(3600);

        assert!(sessions.expire_older_than(Instant::now(), hour).is_empty());

        let mut expired = sessions.expire_older_than(Instant::now() + 2 * hour, hour);
        expired.sort();
        assert_eq!(expired, vec!["s1", "s2"]);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn get_or_insert_keeps_the_live_session() {
        let mut sessions = SessionManager::new();
        let first = sessions.get_or_insert(session("s1"));
        first.context.lock().await.add_user_input("oi");

        let second = sessions.get_or_insert(session("s1"));
        assert_eq!(second.context.lock().await.blocks().len(), 2);
        assert!(second.last_touched >= first.last_touched);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn call_count_is_shared_and_taken_once() {
        let mut sessions = SessionManager::new();
        let created = sessions.create(session("s1"));
        created.count_call();
        sessions.get("s1").unwrap().count_call();

        assert_eq!(sessions.get("s1").unwrap().take_calls(), 2);
        assert_eq!(created.take_calls(), 0);
    }

    #[tokio::test]
    async fn clones_share_the_context_engine() {
        let mut sessions = SessionManager::new();
        let created = sessions.create(session("s1"));
        created.context.lock().await.add_user_input("oi");

        let fetched = sessions.get("s1").unwrap();
        assert_eq!(fetched.context.lock().await.blocks().len(), 2);
    }
}
