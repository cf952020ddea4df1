//! Complementary documents over the session's activities.
//!
//! A dossier lists every activity with its full content, a summary lists
//! titles and objectives, a script orders the activities as a class plan.

use async_trait::async_trait;
use mentor_core::capability::{
    Capability, CapabilityCategory, CapabilityOutcome, ExecutionContext,
};
use mentor_core::error::CapabilityError;
use mentor_core::params::{CapabilityParams, DocumentKind};
use serde_json::json;
use std::fmt::Write;

use crate::store::{Activity, ActivityStore, Document};
use crate::unexpected_params;

pub struct CreateDocument {
    store: ActivityStore,
}

impl CreateDocument {
    pub fn new(store: ActivityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for CreateDocument {
    fn name(&self) -> &str {
        "create_document"
    }

    fn display_name(&self) -> &str {
        "Preparando o documento complementar"
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Create
    }

    fn description(&self) -> &str {
        "Write a dossier, summary or class script covering the activities created in this session."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "kind": { "type": "string", "enum": ["dossier", "summary", "script"] },
                "title": { "type": "string" }
            }
        })
    }

    async fn execute(
        &self,
        params: CapabilityParams,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        let p = match params {
            CapabilityParams::CreateDocument(p) => p,
            other => return Err(unexpected_params(self.name(), &other)),
        };

        let activities = self.store.drafts(&ctx.session_id).await;
        if activities.is_empty() {
            return Err(CapabilityError::ExecutionFailed {
                capability: self.name().into(),
                reason: "no activities were created in this session".into(),
            });
        }

        let kind = p.kind.unwrap_or(DocumentKind::Dossier);
        let title = p.title.unwrap_or_else(|| default_title(kind).to_string());
        let document = Document {
            kind: kind_label(kind).to_string(),
            body: render(kind, &title, &activities),
            title,
            activity_ids: activities.iter().map(|a| a.id.clone()).collect(),
        };

        self.store.add_document(&ctx.session_id, document.clone()).await;
        Ok(CapabilityOutcome::ok(
            format!("Documento \"{}\" criado", document.title),
            json!({ "document": document }),
        ))
    }
}

fn kind_label(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Dossier => "dossier",
        DocumentKind::Summary => "summary",
        DocumentKind::Script => "script",
    }
}

fn default_title(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Dossier => "Dossiê das atividades",
        DocumentKind::Summary => "Resumo das atividades",
        DocumentKind::Script => "Roteiro de aula",
    }
}

fn render(kind: DocumentKind, title: &str, activities: &[Activity]) -> String {
    let mut out = format!("# {title}\n");
    for (i, activity) in activities.iter().enumerate() {
        let content = activity.content.as_ref();
        match kind {
            DocumentKind::Summary => {
                let objective = content.map(|c| c.objective.as_str()).unwrap_or("");
                let _ = write!(out, "\n- **{}**: {objective}", activity.title);
            }
            DocumentKind::Script => {
                let _ = write!(out, "\n## Momento {}: {}\n", i + 1, activity.title);
                if let Some(c) = content {
                    let _ = writeln!(out, "{}", c.instructions);
                }
            }
            DocumentKind::Dossier => {
                let _ = write!(out, "\n## {}\n", activity.title);
                if let Some(c) = content {
                    let _ = writeln!(out, "**Objetivo:** {}\n", c.objective);
                    let _ = writeln!(out, "{}\n", c.instructions);
                    for (n, q) in c.questions.iter().enumerate() {
                        let _ = writeln!(out, "{}. {q}", n + 1);
                    }
                }
            }
        }
    }
    out
}
