//! Search capabilities: the activity catalog and the teacher's account.

use async_trait::async_trait;
use mentor_core::capability::{
    Capability, CapabilityCategory, CapabilityOutcome, ExecutionContext,
};
use mentor_core::error::CapabilityError;
use mentor_core::params::CapabilityParams;
use serde_json::json;

use crate::catalog;
use crate::store::ActivityStore;
use crate::unexpected_params;

const DEFAULT_CATALOG_LIMIT: usize = 10;
const DEFAULT_ACCOUNT_LIMIT: usize = 20;

pub struct CatalogSearch;

#[async_trait]
impl Capability for CatalogSearch {
    fn name(&self) -> &str {
        "search_activity_catalog"
    }

    fn display_name(&self) -> &str {
        "Pesquisando atividades disponíveis"
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Search
    }

    fn description(&self) -> &str {
        "List activity templates from the catalog that fit a subject and grade. Run before deciding what to create."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "subject": { "type": "string", "description": "School subject, e.g. \"matemática\"" },
                "grade": { "type": "string", "description": "Grade level, e.g. \"7º ano\"" },
                "limit": { "type": "integer", "description": "Maximum entries to return (default 10)" }
            }
        })
    }

    async fn execute(
        &self,
        params: CapabilityParams,
        _ctx: &ExecutionContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        let p = match params {
            CapabilityParams::SearchActivityCatalog(p) => p,
            other => return Err(unexpected_params(self.name(), &other)),
        };

        let limit = p.limit.unwrap_or(DEFAULT_CATALOG_LIMIT);
        let activities: Vec<_> = catalog::search(p.subject.as_deref(), p.grade.as_deref())
            .into_iter()
            .take(limit)
            .collect();

        if activities.is_empty() {
            return Err(CapabilityError::ExecutionFailed {
                capability: self.name().into(),
                reason: "no catalog entry fits the requested subject and grade".into(),
            });
        }

        Ok(CapabilityOutcome::ok(
            format!("{} atividades encontradas no catálogo", activities.len()),
            json!({
                "subject": p.subject,
                "grade": p.grade,
                "total": activities.len(),
                "activities": activities,
            }),
        ))
    }
}

pub struct AccountSearch {
    store: ActivityStore,
}

impl AccountSearch {
    pub fn new(store: ActivityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for AccountSearch {
    fn name(&self) -> &str {
        "search_account_activities"
    }

    fn display_name(&self) -> &str {
        "Consultando suas atividades anteriores"
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Search
    }

    fn description(&self) -> &str {
        "List activities the teacher already saved, so new ones avoid repeating them."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "description": "Maximum activities to return (default 20)" }
            }
        })
    }

    async fn execute(
        &self,
        params: CapabilityParams,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        let p = match params {
            CapabilityParams::SearchAccountActivities(p) => p,
            other => return Err(unexpected_params(self.name(), &other)),
        };

        let activities: Vec<_> = self
            .store
            .account(&ctx.user_id)
            .await
            .into_iter()
            .take(p.limit.unwrap_or(DEFAULT_ACCOUNT_LIMIT))
            .collect();

        let message = if activities.is_empty() {
            "Nenhuma atividade salva na conta".to_string()
        } else {
            format!("{} atividades já salvas na conta", activities.len())
        };

        Ok(CapabilityOutcome::ok(
            message,
            json!({ "total": activities.len(), "activities": activities }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::activity;
    use mentor_core::params::{AccountSearchParams, CatalogSearchParams};

    #[tokio::test]
    async fn catalog_search_filters() {
        let ctx = ExecutionContext::new("s1", "u1");
        let params = CapabilityParams::SearchActivityCatalog(CatalogSearchParams {
            subject: Some("história".into()),
            grade: Some("8º ano".into()),
            limit: Some(3),
        });

        let outcome = CatalogSearch.execute(params, &ctx).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data["total"], 3);
        assert_eq!(outcome.data["activities"][0]["id"], "linha-do-tempo");
        assert_eq!(outcome.data["subject"], "história");
    }

    #[tokio::test]
    async fn catalog_search_with_no_match_fails() {
        let ctx = ExecutionContext::new("s1", "u1");
        let params = CapabilityParams::SearchActivityCatalog(CatalogSearchParams {
            subject: None,
            grade: Some("1º ano".into()),
            limit: Some(0),
        });
        assert!(CatalogSearch.execute(params, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn account_search_reads_saved_activities() {
        let store = ActivityStore::new();
        store.add_drafts("old", vec![activity("quiz-interativo")]).await;
        store.save_drafts("old", "u1").await;

        let search = AccountSearch::new(store);
        let ctx = ExecutionContext::new("s1", "u1");
        let outcome = search
            .execute(
                CapabilityParams::SearchAccountActivities(AccountSearchParams::default()),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.data["total"], 1);
        assert_eq!(outcome.data["activities"][0]["catalog_id"], "quiz-interativo");
    }

    #[tokio::test]
    async fn wrong_variant_is_rejected() {
        let ctx = ExecutionContext::new("s1", "u1");
        let params = CapabilityParams::SearchAccountActivities(AccountSearchParams::default());
        let err = CatalogSearch.execute(params, &ctx).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidParams { .. }));
    }
}
