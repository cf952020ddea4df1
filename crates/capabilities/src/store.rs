//! Shared activity store.
//!
//! Activities created during a session are drafts of that session until
//! `save_activities` moves them into the teacher's account. Documents are
//! kept per session. The store is cheap to clone and shared by every
//! capability of a registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Draft,
    Saved,
}

/// Generated material for one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityContent {
    pub objective: String,
    pub instructions: String,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub catalog_id: String,
    pub title: String,
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ActivityContent>,
    pub status: ActivityStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub kind: String,
    pub title: String,
    pub body: String,
    pub activity_ids: Vec<String>,
}

#[derive(Default)]
struct Inner {
    drafts: HashMap<String, Vec<Activity>>,
    accounts: HashMap<String, Vec<Activity>>,
    documents: HashMap<String, Vec<Document>>,
}

#[derive(Clone, Default)]
pub struct ActivityStore {
    inner: Arc<RwLock<Inner>>,
}

impl ActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add drafts to a session, skipping catalog entries already drafted.
    ///
    /// Returns the drafts actually added.
    pub async fn add_drafts(&self, session_id: &str, activities: Vec<Activity>) -> Vec<Activity> {
        let mut inner = self.inner.write().await;
        let drafts = inner.drafts.entry(session_id.to_string()).or_default();

        let mut added = Vec::new();
        for activity in activities {
            if drafts.iter().any(|d| d.catalog_id == activity.catalog_id) {
                continue;
            }
            drafts.push(activity.clone());
            added.push(activity);
        }
        added
    }

    /// Every activity created in a session, saved or not.
    pub async fn drafts(&self, session_id: &str) -> Vec<Activity> {
        self.inner
            .read()
            .await
            .drafts
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy a session's unsaved drafts into the user's account.
    ///
    /// Returns the newly saved activities.
    pub async fn save_drafts(&self, session_id: &str, user_id: &str) -> Vec<Activity> {
        let mut inner = self.inner.write().await;
        let Inner {
            drafts, accounts, ..
        } = &mut *inner;

        let Some(session_drafts) = drafts.get_mut(session_id) else {
            return Vec::new();
        };
        let account = accounts.entry(user_id.to_string()).or_default();

        let mut saved = Vec::new();
        for draft in session_drafts
            .iter_mut()
            .filter(|d| d.status == ActivityStatus::Draft)
        {
            draft.status = ActivityStatus::Saved;
            account.push(draft.clone());
            saved.push(draft.clone());
        }
        saved
    }

    /// Activities saved in a user's account, newest first.
    pub async fn account(&self, user_id: &str) -> Vec<Activity> {
        let mut activities = self
            .inner
            .read()
            .await
            .accounts
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        activities.reverse();
        activities
    }

    pub async fn add_document(&self, session_id: &str, document: Document) {
        self.inner
            .write()
            .await
            .documents
            .entry(session_id.to_string())
            .or_default()
            .push(document);
    }

    pub async fn documents(&self, session_id: &str) -> Vec<Document> {
        self.inner
            .read()
            .await
            .documents
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) fn activity(catalog_id: &str) -> Activity {
    Activity {
        id: format!("act-{catalog_id}"),
        catalog_id: catalog_id.to_string(),
        title: catalog_id.to_string(),
        activity_type: "quiz".into(),
        subject: None,
        grade: None,
        content: None,
        status: ActivityStatus::Draft,
        created_at: Utc::now(),
    }
}
