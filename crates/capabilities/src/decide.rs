//! Decide which catalog activities to create.
//!
//! Candidates come from the upstream catalog search when it ran, otherwise
//! straight from the catalog. Activities already saved in the account are
//! skipped unless nothing else is left.

use async_trait::async_trait;
use mentor_core::capability::{
    Capability, CapabilityCategory, CapabilityOutcome, ExecutionContext,
};
use mentor_core::error::CapabilityError;
use mentor_core::params::CapabilityParams;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::debug;

use crate::catalog::{self, CatalogEntry, fold};
use crate::unexpected_params;

const MAX_QUANTITY: usize = 5;

const SUBJECTS: &[(&str, &str)] = &[
    ("matematica", "matemática"),
    ("portugues", "português"),
    ("ciencias", "ciências"),
    ("historia", "história"),
    ("geografia", "geografia"),
    ("ingles", "inglês"),
    ("artes", "artes"),
    ("educacao fisica", "educação física"),
];

const NUMBER_WORDS: &[(&str, usize)] = &[
    ("uma", 1),
    ("um", 1),
    ("duas", 2),
    ("dois", 2),
    ("tres", 3),
    ("quatro", 4),
    ("cinco", 5),
];

/// One activity chosen for creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub catalog_id: String,
    pub title: String,
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    pub rationale: String,
}

/// Decisions published by an upstream `decide_activities` outcome.
pub fn upstream_decisions(ctx: &ExecutionContext) -> Vec<Decision> {
    ctx.upstream("decide_activities")
        .and_then(|o| o.data.get("decisions").cloned())
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

pub struct DecideActivities;

#[async_trait]
impl Capability for DecideActivities {
    fn name(&self) -> &str {
        "decide_activities"
    }

    fn display_name(&self) -> &str {
        "Decidindo quais atividades criar"
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Decide
    }

    fn description(&self) -> &str {
        "Choose which catalog activities to create for the request, skipping ones already in the account. Needs the catalog search results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "context": { "type": "string", "description": "The teacher's request" },
                "quantity": { "type": "integer", "description": "How many activities to create" },
                "subject": { "type": "string" },
                "grade": { "type": "string" }
            },
            "required": ["context"]
        })
    }

    async fn execute(
        &self,
        params: CapabilityParams,
        ctx: &ExecutionContext,
    ) -> Result<CapabilityOutcome, CapabilityError> {
        let p = match params {
            CapabilityParams::DecideActivities(p) => p,
            other => return Err(unexpected_params(self.name(), &other)),
        };

        let search = ctx.upstream("search_activity_catalog");
        let subject = p
            .subject
            .or_else(|| upstream_str(search.map(|o| &o.data), "subject"))
            .or_else(|| detect_subject(&p.context));
        let grade = p
            .grade
            .or_else(|| upstream_str(search.map(|o| &o.data), "grade"))
            .or_else(|| detect_grade(&p.context));

        let candidates = match search.and_then(|o| o.data.get("activities")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|i| i.get("id").and_then(Value::as_str))
                .filter_map(catalog::find)
                .collect(),
            _ => {
                debug!("No upstream catalog search, reading the catalog directly");
                catalog::search(subject.as_deref(), grade.as_deref())
            }
        };

        let already_saved = saved_catalog_ids(ctx);
        let fresh: Vec<&CatalogEntry> = candidates
            .iter()
            .copied()
            .filter(|e| !already_saved.contains(e.id))
            .collect();
        let pool = if fresh.is_empty() { candidates } else { fresh };

        if pool.is_empty() {
            return Err(CapabilityError::ExecutionFailed {
                capability: self.name().into(),
                reason: "no candidate activities to decide from".into(),
            });
        }

        let quantity = p
            .quantity
            .or_else(|| quantity_from_text(&p.context))
            .unwrap_or(1)
            .clamp(1, MAX_QUANTITY);

        let decisions: Vec<Decision> = pool
            .iter()
            .take(quantity)
            .map(|entry| Decision {
                catalog_id: entry.id.to_string(),
                title: entry.title.to_string(),
                activity_type: entry.activity_type.to_string(),
                subject: subject.clone(),
                grade: grade.clone(),
                rationale: entry.description.to_string(),
            })
            .collect();

        let titles: Vec<&str> = decisions.iter().map(|d| d.title.as_str()).collect();
        Ok(CapabilityOutcome::ok(
            format!("{} atividade(s) escolhida(s): {}", decisions.len(), titles.join(", ")),
            json!({
                "subject": subject,
                "grade": grade,
                "quantity": decisions.len(),
                "decisions": decisions,
            }),
        ))
    }
}

fn upstream_str(data: Option<&Value>, key: &str) -> Option<String> {
    data?.get(key)?.as_str().map(str::to_string)
}

fn saved_catalog_ids(ctx: &ExecutionContext) -> HashSet<String> {
    let Some(Value::Array(items)) = ctx
        .upstream("search_account_activities")
        .and_then(|o| o.data.get("activities"))
    else {
        return HashSet::new();
    };
    items
        .iter()
        .filter_map(|i| i.get("catalog_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// School subject mentioned in free text, in its accented form.
pub fn detect_subject(text: &str) -> Option<String> {
    let folded = fold(text);
    SUBJECTS
        .iter()
        .find(|(key, _)| folded.contains(key))
        .map(|(_, label)| label.to_string())
}

/// Grade phrase like "7º ano" or "2ª série" mentioned in free text.
pub fn detect_grade(text: &str) -> Option<String> {
    let folded = fold(text);
    let words: Vec<&str> = folded.split_whitespace().collect();

    for (i, word) in words.iter().enumerate() {
        let digits: String = word.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let rest = &word[digits.len()..];
        let rest = match rest.trim_start_matches(['º', '°', 'ª']) {
            "o" | "a" => "",
            other => other,
        };
        let unit = if rest.is_empty() {
            words.get(i + 1).copied().unwrap_or_default()
        } else {
            rest
        };
        if unit.starts_with("ano") {
            return Some(format!("{digits}º ano"));
        }
        if unit.starts_with("serie") {
            return Some(format!("{digits}ª série"));
        }
    }
    None
}

/// Quantity of activities asked for ("3 atividades", "duas listas").
fn quantity_from_text(text: &str) -> Option<usize> {
    let folded = fold(text);
    let words: Vec<&str> = folded.split_whitespace().collect();

    words.windows(2).find_map(|pair| {
        let next = pair[1];
        if !(next.starts_with("atividade")
            || next.starts_with("lista")
            || next.starts_with("quiz")
            || next.starts_with("exercicio"))
        {
            return None;
        }
        pair[0].parse::<usize>().ok().or_else(|| {
            NUMBER_WORDS
                .iter()
                .find(|(w, _)| *w == pair[0])
                .map(|(_, n)| *n)
        })
    })
}
