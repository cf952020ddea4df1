use async_trait::async_trait;
use mentor_core::capability::{
    Capability, CapabilityCategory, CapabilityOutcome, ExecutionContext,
};
use mentor_core::error::CapabilityError;
use mentor_core::params::CapabilityParams;
use serde_json::json;

use crate::store::ActivityStore;
use crate::unexpected_params;

/// Moves the session's drafts into the teacher's account.
pub struct SaveActivities {
    store: ActivityStore,
}

impl SaveActivities {
    pub fn new(store: ActivityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for SaveActivities {
    fn name(&self) -> &str {
        "save_activities"
    }

    fn display_name(&self) -> &str {
        "Salvando as atividades na sua conta"
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Persist
    }

    fn description(&self) -> &str {
        "Save every activity created in this session to the teacher's account."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        params: CapabilityParams,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        if !matches!(params, CapabilityParams::SaveActivities(_)) {
            return Err(unexpected_params(self.name(), &params));
        }

        let drafts = self.store.drafts(&ctx.session_id).await;
        if drafts.is_empty() {
            return Err(CapabilityError::ExecutionFailed {
                capability: self.name().into(),
                reason: "no activities were created in this session".into(),
            });
        }

        let saved = self.store.save_drafts(&ctx.session_id, &ctx.user_id).await;
        let ids: Vec<&str> = saved.iter().map(|a| a.id.as_str()).collect();
        let message = if saved.is_empty() {
            "Todas as atividades já estavam salvas".to_string()
        } else {
            format!("{} atividade(s) salva(s) na sua conta", saved.len())
        };

        Ok(CapabilityOutcome::ok(
            message,
            json!({ "saved": ids, "count": saved.len() }),
        ))
    }
}
