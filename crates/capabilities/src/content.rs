//! Generate content for decided activities.
//!
//! Content is assembled from the activity type, subject, grade and topic.
//! It is deterministic, so a rerun of the same plan yields the same text.

use async_trait::async_trait;
use mentor_core::capability::{
    Capability, CapabilityCategory, CapabilityOutcome, ExecutionContext,
};
use mentor_core::error::CapabilityError;
use mentor_core::params::CapabilityParams;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::decide::{Decision, upstream_decisions};
use crate::store::ActivityContent;
use crate::unexpected_params;

/// Generated content for one decided activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub catalog_id: String,
    pub title: String,
    pub content: ActivityContent,
}

/// Content published by an upstream `generate_activity_content` outcome.
pub fn upstream_contents(ctx: &ExecutionContext) -> Vec<GeneratedContent> {
    ctx.upstream("generate_activity_content")
        .and_then(|o| o.data.get("contents").cloned())
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

pub struct GenerateContent;

#[async_trait]
impl Capability for GenerateContent {
    fn name(&self) -> &str {
        "generate_activity_content"
    }

    fn display_name(&self) -> &str {
        "Gerando o conteúdo das atividades"
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Generate
    }

    fn description(&self) -> &str {
        "Write objectives, instructions and questions for every decided activity."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "context": { "type": "string", "description": "The teacher's request" },
                "topic": { "type": "string", "description": "Specific topic to focus on" }
            }
        })
    }

    async fn execute(
        &self,
        params: CapabilityParams,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        let p = match params {
            CapabilityParams::GenerateActivityContent(p) => p,
            other => return Err(unexpected_params(self.name(), &other)),
        };

        let decisions = upstream_decisions(ctx);
        if decisions.is_empty() {
            return Err(CapabilityError::ExecutionFailed {
                capability: self.name().into(),
                reason: "no decided activities; run decide_activities first".into(),
            });
        }

        let topic = p.topic.as_deref();
        let contents: Vec<GeneratedContent> = decisions
            .iter()
            .map(|d| GeneratedContent {
                catalog_id: d.catalog_id.clone(),
                title: d.title.clone(),
                content: compose(d, topic),
            })
            .collect();

        let questions: usize = contents.iter().map(|c| c.content.questions.len()).sum();
        Ok(CapabilityOutcome::ok(
            format!(
                "Conteúdo gerado para {} atividade(s), {questions} questões",
                contents.len()
            ),
            json!({ "contents": contents }),
        ))
    }
}

/// Build the content of one activity.
pub fn compose(decision: &Decision, topic: Option<&str>) -> ActivityContent {
    let subject = decision.subject.as_deref().unwrap_or("a disciplina");
    let grade = decision.grade.as_deref().unwrap_or("a turma");
    let focus = topic.unwrap_or(subject);

    let objective = format!(
        "Desenvolver com {grade} habilidades de {subject} sobre {focus} por meio de {}.",
        decision.title.to_lowercase()
    );
    let instructions = format!(
        "{}: {}. Leia cada questão com atenção e registre seu raciocínio.",
        decision.title, decision.rationale
    );
    let questions = (1..=3)
        .map(|n| match n {
            1 => format!("Explique com suas palavras o que você já sabe sobre {focus}."),
            2 => format!("Resolva uma situação do cotidiano que envolva {focus}."),
            _ => format!("Crie um exemplo próprio de {focus} e compartilhe com a turma."),
        })
        .collect();

    ActivityContent {
        objective,
        instructions,
        questions,
    }
}
