use async_trait::async_trait;
use chrono::Utc;
use mentor_core::capability::{
    Capability, CapabilityCategory, CapabilityOutcome, ExecutionContext,
};
use mentor_core::error::CapabilityError;
use mentor_core::params::CapabilityParams;
use serde_json::json;
use tracing::debug;

use crate::content::{compose, upstream_contents};
use crate::decide::upstream_decisions;
use crate::store::{Activity, ActivityStatus, ActivityStore};
use crate::unexpected_params;

/// Materializes decided activities as session drafts.
pub struct CreateActivity {
    store: ActivityStore,
}

impl CreateActivity {
    pub fn new(store: ActivityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for CreateActivity {
    fn name(&self) -> &str {
        "create_activity"
    }

    fn display_name(&self) -> &str {
        "Criando as atividades"
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Create
    }

    fn description(&self) -> &str {
        "Create the decided activities, using generated content when available."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "context": { "type": "string" },
                "activity_id": { "type": "string", "description": "Create only this decided catalog entry" },
                "title": { "type": "string", "description": "Custom title (single activity only)" }
            }
        })
    }

    async fn execute(
        &self,
        params: CapabilityParams,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        let p = match params {
            CapabilityParams::CreateActivity(p) => p,
            other => return Err(unexpected_params(self.name(), &other)),
        };

        let mut decisions = upstream_decisions(ctx);
        if let Some(id) = &p.activity_id {
            decisions.retain(|d| &d.catalog_id == id);
        }
        if decisions.is_empty() {
            return Err(CapabilityError::ExecutionFailed {
                capability: self.name().into(),
                reason: match &p.activity_id {
                    Some(id) => format!("activity '{id}' was not decided"),
                    None => "no decided activities; run decide_activities first".into(),
                },
            });
        }

        let contents = upstream_contents(ctx);
        let custom_title = p.title.filter(|_| decisions.len() == 1);
        let now = Utc::now();

        let activities: Vec<Activity> = decisions
            .iter()
            .map(|d| {
                let content = contents
                    .iter()
                    .find(|c| c.catalog_id == d.catalog_id)
                    .map(|c| c.content.clone())
                    .unwrap_or_else(|| compose(d, None));
                Activity {
                    id: uuid::Uuid::new_v4().to_string(),
                    catalog_id: d.catalog_id.clone(),
                    title: custom_title.clone().unwrap_or_else(|| d.title.clone()),
                    activity_type: d.activity_type.clone(),
                    subject: d.subject.clone(),
                    grade: d.grade.clone(),
                    content: Some(content),
                    status: ActivityStatus::Draft,
                    created_at: now,
                }
            })
            .collect();

        let created = self.store.add_drafts(&ctx.session_id, activities).await;
        if created.len() < decisions.len() {
            debug!(
                session_id = %ctx.session_id,
                skipped = decisions.len() - created.len(),
                "Some activities already existed in this session"
            );
        }

        let session_activities = self.store.drafts(&ctx.session_id).await;
        let ids: Vec<&str> = created.iter().map(|a| a.id.as_str()).collect();
        let message = if created.is_empty() {
            format!("As {} atividades já estavam criadas", session_activities.len())
        } else {
            let titles: Vec<&str> = created.iter().map(|a| a.title.as_str()).collect();
            format!("Criada(s): {}", titles.join(", "))
        };

        Ok(CapabilityOutcome::ok(
            message,
            json!({
                "activities_created": ids,
                "activities": session_activities,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::GeneratedContent;
    use crate::decide::Decision;
    use crate::store::ActivityContent;
    use mentor_core::params::CreateActivityParams;

    fn decided(ids: &[&str]) -> ExecutionContext {
        let decisions: Vec<Decision> = ids
            .iter()
            .map(|id| Decision {
                catalog_id: id.to_string(),
                title: format!("Título {id}"),
                activity_type: "quiz".into(),
                subject: Some("artes".into()),
                grade: Some("5º ano".into()),
                rationale: "r".into(),
            })
            .collect();
        let mut ctx = ExecutionContext::new("s1", "u1");
        ctx.previous_results.insert(
            "decide_activities".into(),
            CapabilityOutcome::ok("", json!({ "decisions": decisions })),
        );
        ctx
    }

    fn create(p: CreateActivityParams) -> CapabilityParams {
        CapabilityParams::CreateActivity(p)
    }

    #[tokio::test]
    async fn creates_drafts_from_decisions() {
        let store = ActivityStore::new();
        let cap = CreateActivity::new(store.clone());
        let ctx = decided(&["a", "b"]);

        let outcome = cap.execute(create(Default::default()), &ctx).await.unwrap();
        assert_eq!(outcome.data["activities_created"].as_array().unwrap().len(), 2);

        let drafts = store.drafts("s1").await;
        assert_eq!(drafts.len(), 2);
        assert!(drafts.iter().all(|a| a.content.is_some()));
    }

    #[tokio::test]
    async fn uses_generated_content() {
        let store = ActivityStore::new();
        let cap = CreateActivity::new(store.clone());
        let mut ctx = decided(&["a"]);
        let generated = GeneratedContent {
            catalog_id: "a".into(),
            title: "Título a".into(),
            content: ActivityContent {
                objective: "objetivo gerado".into(),
                instructions: String::new(),
                questions: vec![],
            },
        };
        ctx.previous_results.insert(
            "generate_activity_content".into(),
            CapabilityOutcome::ok("", json!({ "contents": [generated] })),
        );

        cap.execute(
            create(CreateActivityParams {
                title: Some("Meu quiz".into()),
                ..Default::default()
            }),
            &ctx,
        )
        .await
        .unwrap();

        let drafts = store.drafts("s1").await;
        assert_eq!(drafts[0].title, "Meu quiz");
        assert_eq!(
            drafts[0].content.as_ref().unwrap().objective,
            "objetivo gerado"
        );
    }

    #[tokio::test]
    async fn repeated_creation_is_idempotent() {
        let store = ActivityStore::new();
        let cap = CreateActivity::new(store.clone());
        let ctx = decided(&["a"]);

        cap.execute(create(Default::default()), &ctx).await.unwrap();
        let again = cap.execute(create(Default::default()), &ctx).await.unwrap();
        assert!(again.success);
        assert!(again.data["activities_created"].as_array().unwrap().is_empty());
        assert_eq!(store.drafts("s1").await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_activity_id_fails() {
        let cap = CreateActivity::new(ActivityStore::new());
        let ctx = decided(&["a"]);
        let err = cap
            .execute(
                create(CreateActivityParams {
                    activity_id: Some("zzz".into()),
                    ..Default::default()
                }),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }
}
